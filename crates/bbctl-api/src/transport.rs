// Shared transport configuration for building the reqwest::Client used
// against the local appservice.
//
// The transaction forwarder and the HTTP tunnel share one client built
// here, so TLS and timeout settings live in a single place.

use std::time::Duration;

use crate::error::Error;

/// User agent sent on local appservice calls and the websocket upgrade.
pub const USER_AGENT: &str = concat!("bbctl/", env!("CARGO_PKG_VERSION"));

/// Timeout for a single call to the local appservice.
pub const DEFAULT_LOCAL_TIMEOUT: Duration = Duration::from_secs(10);

/// TLS verification mode for the local appservice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Accept any certificate (for self-signed local bridges).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: DEFAULT_LOCAL_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);

        match self.tls {
            TlsMode::System => {}
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}
