//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use bbctl_config::ConfigError;
use bbctl_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const REGISTRATION: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Registration ─────────────────────────────────────────────────

    #[error("Failed to load registration from {path}")]
    #[diagnostic(
        code(bbctl::registration_load),
        help("Check that the file exists and is valid appservice registration YAML.\n{reason}")
    )]
    RegistrationLoad { path: String, reason: String },

    #[error("{message}")]
    #[diagnostic(code(bbctl::invalid_registration))]
    InvalidRegistration { message: String },

    #[error("No registration file given")]
    #[diagnostic(
        code(bbctl::missing_registration),
        help(
            "The {bridge} bridge needs the websocket proxy, which reads the registration.\n\
             Pass --registration <FILE> or set BEEPER_BRIDGE_REGISTRATION_FILE."
        )
    )]
    MissingRegistration { bridge: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Not logged in to the {env} environment")]
    #[diagnostic(
        code(bbctl::not_logged_in),
        help(
            "Set `hungry_address` or `username` under [environments.{env}] in {path},\n\
             or pass --homeserver-url."
        )
    )]
    NotLoggedIn { env: String, path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(bbctl::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(bbctl::config))]
    Config(Box<figment::Error>),

    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the appservice websocket")]
    #[diagnostic(
        code(bbctl::connection_failed),
        help("Check the homeserver URL and your network connection.\n{reason}")
    )]
    ConnectionFailed { reason: String },

    #[error("Appservice websocket was taken over by another connection")]
    #[diagnostic(
        code(bbctl::connection_replaced),
        help("Another bbctl process is serving this bridge. Stop it before starting a new one.")
    )]
    ConnectionReplaced,

    // ── Bridge process ───────────────────────────────────────────────

    #[error("Failed to start bridge `{program}`")]
    #[diagnostic(code(bbctl::spawn_failed), help("{reason}"))]
    SpawnFailed { program: String, reason: String },

    #[error("Bridge exited with {status}")]
    #[diagnostic(code(bbctl::bridge_failed))]
    BridgeFailed { status: String, code: Option<i32> },

    // ── Other ────────────────────────────────────────────────────────

    #[error("{0}")]
    #[diagnostic(code(bbctl::internal))]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::RegistrationLoad { .. }
            | Self::InvalidRegistration { .. }
            | Self::MissingRegistration { .. } => exit_code::REGISTRATION,
            Self::NotLoggedIn { .. } | Self::Config(_) => exit_code::CONFIG,
            Self::Validation { .. } => exit_code::USAGE,
            Self::ConnectionFailed { .. } | Self::ConnectionReplaced => exit_code::CONNECTION,
            Self::BridgeFailed { code, .. } => code.filter(|c| *c != 0).unwrap_or(exit_code::GENERAL),
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::RegistrationLoad { path, reason } => Self::RegistrationLoad { path, reason },
            CoreError::InvalidRegistration { message } => Self::InvalidRegistration { message },
            CoreError::ConnectionFailed { reason } => Self::ConnectionFailed { reason },
            CoreError::SpawnFailed { program, reason } => Self::SpawnFailed { program, reason },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Process(e) => Self::Io(e),
            other => Self::Internal(other.to_string()),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl CliError {
    pub fn from_config(err: ConfigError, path: &std::path::Path) -> Self {
        match err {
            ConfigError::NotLoggedIn { env } => Self::NotLoggedIn {
                env: env.to_string(),
                path: path.display().to_string(),
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Figment(e) => Self::Config(e),
        }
    }
}
