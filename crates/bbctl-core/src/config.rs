// ── Runtime proxy configuration ──
//
// These types describe *how* to run the proxy: where hungryserv lives,
// how to reach the local appservice, and the supervision timings.
// They never touch disk. The CLI builds a `ProxyConfig` from its own
// config file and flags and hands it in.

use std::time::Duration;

use bbctl_api::transport::{DEFAULT_LOCAL_TIMEOUT, TlsMode, TransportConfig};
use bbctl_api::websocket::DEFAULT_REQUEST_TIMEOUT;
use url::Url;
use uuid::Uuid;

use crate::backoff::BackoffPolicy;

/// How often the keepalive loop pings the websocket.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// How long the bridge gets between SIGTERM and a forced kill.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// TLS verification strategy for the local appservice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Skip verification (self-signed local bridges).
    DangerAcceptInvalid,
}

/// Configuration for one proxy run.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Hungryserv base URL the websocket connects to.
    pub homeserver_url: Url,
    /// TLS verification for calls to the local appservice.
    pub tls: TlsVerification,
    /// Timeout for each call to the local appservice.
    pub local_timeout: Duration,
    /// Timeout for requests sent over the websocket (pings).
    pub request_timeout: Duration,
    pub keepalive_interval: Duration,
    pub backoff: BackoffPolicy,
    pub shutdown_grace: Duration,
    /// Identifies this process to hungryserv across reconnects.
    pub process_id: Uuid,
}

impl ProxyConfig {
    pub fn new(homeserver_url: Url) -> Self {
        Self {
            homeserver_url,
            tls: TlsVerification::default(),
            local_timeout: DEFAULT_LOCAL_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            backoff: BackoffPolicy::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            process_id: Uuid::new_v4(),
        }
    }

    pub(crate) fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.local_timeout,
        }
    }
}
