//! Clap derive structures for the `bbctl` CLI.
//!
//! Only depends on clap and clap_complete so build.rs can include it
//! for man page generation.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// bbctl -- run self-hosted bridges against Beeper
#[derive(Debug, Parser)]
#[command(
    name = "bbctl",
    version,
    about = "Run self-hosted Matrix bridges connected to Beeper",
    long_about = "Runs bridges on your own machine while Beeper's homeserver delivers\n\
        events to them over an outbound appservice websocket.\n\n\
        Bridges that only speak plain appservice HTTP are served by a local\n\
        proxy that relays transactions from the websocket.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Beeper environment to use
    #[arg(
        long,
        short = 'e',
        env = "BBCTL_ENV",
        default_value = "prod",
        global = true
    )]
    pub env: EnvArg,

    /// Path to the config file
    #[arg(long, env = "BBCTL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Hungryserv URL (overrides the configured address)
    #[arg(long, env = "BBCTL_HOMESERVER_URL", global = true)]
    pub homeserver_url: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Accept invalid TLS certificates from the local appservice
    #[arg(long, short = 'k', env = "BBCTL_INSECURE", global = true)]
    pub insecure: bool,

    /// Timeout in seconds for requests to the local appservice
    #[arg(long, env = "BBCTL_TIMEOUT", default_value = "10", global = true)]
    pub timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EnvArg {
    /// beeper.com
    Prod,
    /// beeper-staging.com
    Staging,
    /// beeper-dev.com
    Dev,
    /// beeper.localtest.me
    Local,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Relay appservice transactions from the websocket to a local HTTP appservice
    #[command(alias = "x")]
    Proxy(ProxyArgs),

    /// Run a bridge, with the websocket proxy in front of it when needed
    Run(RunArgs),

    /// Inspect the bbctl configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Proxy ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ProxyArgs {
    /// Path to the appservice registration file
    #[arg(long, short = 'r', env = "BEEPER_BRIDGE_REGISTRATION_FILE")]
    pub registration: PathBuf,
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the appservice registration file (needed for the proxy)
    #[arg(long, short = 'r', env = "BEEPER_BRIDGE_REGISTRATION_FILE")]
    pub registration: Option<PathBuf>,

    /// Bridge type, used to decide whether the proxy is needed
    #[arg(long = "type", short = 't', value_name = "TYPE")]
    pub bridge_type: Option<String>,

    /// How the bridge receives events
    #[arg(long, default_value = "auto")]
    pub transport: Transport,

    /// Working directory for the bridge process
    #[arg(long, short = 'w')]
    pub workdir: Option<PathBuf>,

    /// Bridge command and its arguments
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true,
        num_args = 1..,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// Decide from the bridge type
    Auto,
    /// The bridge connects to the websocket itself
    Websocket,
    /// The bridge serves plain HTTP; start the proxy
    Http,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,
    /// Show the resolved settings for the selected environment
    Show,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
