use thiserror::Error;

use swap_common::ProblemDetails;

use crate::state::SignalingState;

/// Errors that can occur during client operation.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The current signaling state forbids sending this message kind.
    /// The transport is never touched.
    #[error("`{kind}` is not allowed in state {state:?}")]
    InvalidState {
        /// State at the time of the attempt.
        state: SignalingState,
        /// Message kind that was refused.
        kind: &'static str,
    },
    /// No response arrived within the request timeout.
    #[error("request timed out")]
    Timeout,
    /// The relay link is down and the request could not complete.
    #[error("not connected to the relay")]
    Disconnected,
    /// The relay answered with a non-2xx status.
    #[error("request rejected with status {status}")]
    Rejected {
        /// Status carried by the response.
        status: u16,
        /// Problem details, when the relay attached them.
        problem: Option<ProblemDetails>,
    },
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// Wire message (de)serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Security envelope pack or unpack error.
    #[error("envelope error: {0}")]
    Envelope(#[from] swap_common::EnvelopeError),
}
