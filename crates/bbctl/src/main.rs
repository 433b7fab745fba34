mod cli;
mod commands;
mod config;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::{CliError, exit_code};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    match run(cli).await {
        Ok(exit_code::SUCCESS) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            std::process::exit(code);
        }
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

/// Dispatch the command; `Ok` carries the process exit code.
async fn run(cli: Cli) -> Result<i32, CliError> {
    match cli.command {
        Command::Proxy(args) => commands::proxy::handle(args, &cli.global).await,
        Command::Run(args) => commands::run::handle(args, &cli.global).await,
        Command::Config(args) => {
            commands::config_cmd::handle(&args, &cli.global)?;
            Ok(exit_code::SUCCESS)
        }
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "bbctl", &mut std::io::stdout());
            Ok(exit_code::SUCCESS)
        }
    }
}
