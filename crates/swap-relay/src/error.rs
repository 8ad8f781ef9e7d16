use thiserror::Error;

/// Errors that can occur during relay server operation.
#[derive(Error, Debug)]
pub enum RelayError {
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wire message (de)serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Security envelope pack or unpack error.
    #[error("envelope error: {0}")]
    Envelope(#[from] swap_common::EnvelopeError),
    /// The connection was closed by the remote peer.
    #[error("connection closed")]
    ConnectionClosed,
    /// TLS configuration error.
    #[error("tls configuration error: {0}")]
    Tls(String),
}
