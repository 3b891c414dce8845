//! Transport error types.

/// Errors that can occur while connecting to or talking with the server.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint URL could not be understood.
    #[error("invalid server URL `{0}`: {1}")]
    InvalidUrl(String, String),

    /// TCP/TLS/WebSocket/MQTT connect failure.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The server hello did not arrive within the handshake timeout.
    #[error("no server hello within {0:?}")]
    HelloTimeout(std::time::Duration),

    /// The handshake produced something other than a usable hello.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connection is gone; sending is no longer possible.
    #[error("connection closed: {0}")]
    Closed(String),

    /// A frame could not be queued for sending.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Connecting was cancelled by shutdown.
    #[error("connect cancelled")]
    Cancelled,
}
