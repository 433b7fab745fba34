// ── Core error types ──
//
// Errors from bbctl-core. Registration problems are fatal and surface to
// the operator before any connection is attempted; delivery errors are
// per-request and end up as error replies on the websocket.
// The `From<bbctl_api::Error>` impl translates transport-layer errors.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Registration errors ──────────────────────────────────────────
    #[error("Failed to load registration from {path}: {reason}")]
    RegistrationLoad { path: String, reason: String },

    #[error("{message}")]
    InvalidRegistration { message: String },

    // ── Delivery errors ──────────────────────────────────────────────
    #[error("http {status}: {error}: {errcode}")]
    TransactionRejected {
        status: u16,
        errcode: String,
        error: String,
    },

    #[error("http {status} with non-JSON body")]
    NonJsonErrorResponse { status: u16 },

    #[error("Failed to send request to local appservice: {0}")]
    LocalRequest(#[from] reqwest::Error),

    #[error("Invalid proxied request: {message}")]
    InvalidProxyRequest { message: String },

    #[error("Request cancelled")]
    Cancelled,

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to appservice websocket: {reason}")]
    ConnectionFailed { reason: String },

    // ── Process errors ───────────────────────────────────────────────
    #[error("Failed to start bridge process {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Bridge process error: {0}")]
    Process(#[from] std::io::Error),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<bbctl_api::Error> for CoreError {
    fn from(err: bbctl_api::Error) -> Self {
        match err {
            bbctl_api::Error::Transport(e) => CoreError::LocalRequest(e),
            bbctl_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            bbctl_api::Error::UnsupportedScheme(scheme) => CoreError::Config {
                message: format!("Unsupported URL scheme: {scheme}"),
            },
            bbctl_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            bbctl_api::Error::Serialization(e) => {
                CoreError::Internal(format!("Serialization error: {e}"))
            }
            other => CoreError::ConnectionFailed {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_messages_match_wire_format() {
        let err = CoreError::NonJsonErrorResponse { status: 502 };
        assert_eq!(err.to_string(), "http 502 with non-JSON body");

        let err = CoreError::TransactionRejected {
            status: 403,
            errcode: "M_FORBIDDEN".into(),
            error: "bad token".into(),
        };
        assert_eq!(err.to_string(), "http 403: bad token: M_FORBIDDEN");
    }

    #[test]
    fn api_errors_are_translated() {
        let err = CoreError::from(bbctl_api::Error::UnsupportedScheme("ftp".into()));
        assert!(matches!(err, CoreError::Config { .. }));

        let err = CoreError::from(bbctl_api::Error::ConnectionReplaced);
        assert!(matches!(err, CoreError::ConnectionFailed { .. }));
    }
}
