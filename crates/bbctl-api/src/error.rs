use thiserror::Error;

/// Top-level error type for the `bbctl-api` crate.
///
/// Covers the HTTP transport used against the local appservice and every
/// way the appservice websocket can end. `bbctl-core` decides which of
/// these are retryable.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The homeserver URL can't be turned into a websocket URL.
    #[error("Unsupported URL scheme for websocket: {0}")]
    UnsupportedScheme(String),

    /// TLS setup error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket handshake failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket read or write failed mid-stream.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The server closed the websocket.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Another client took over this appservice's websocket.
    #[error("Websocket connection replaced by another client")]
    ConnectionReplaced,

    /// The websocket was stopped on purpose by this process.
    #[error("Websocket stopped manually")]
    ManualStop,

    /// The websocket was force-closed locally, e.g. after a failed ping.
    #[error("{0}")]
    ForcedClose(String),

    /// The channel ended while a request was waiting for its reply.
    #[error("Websocket channel closed")]
    ChannelClosed,

    /// No reply arrived within the channel's request timeout.
    #[error("Request {command} timed out after {timeout_secs}s")]
    RequestTimeout { command: String, timeout_secs: u64 },

    /// The server answered a request with an error reply.
    #[error("Server returned error {code}: {message}")]
    Remote { code: String, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_errors_display() {
        let err = Error::WebSocketClosed {
            code: 1006,
            reason: "abnormal".into(),
        };
        assert_eq!(err.to_string(), "WebSocket closed (code 1006): abnormal");

        let err = Error::RequestTimeout {
            command: "ping".into(),
            timeout_secs: 30,
        };
        assert_eq!(err.to_string(), "Request ping timed out after 30s");
    }

    #[test]
    fn forced_close_displays_bare_message() {
        let err = Error::ForcedClose("websocket ping returned error in 30s: boom".into());
        assert_eq!(err.to_string(), "websocket ping returned error in 30s: boom");
    }
}
