//! SWAP v1 client runtime — persistent relay connection with typed
//! events, request/response correlation, and automatic reconnection.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Exponential backoff with jitter for reconnection.
pub mod backoff;
/// Client configuration.
pub mod config;
/// Error types for client operations.
pub mod error;
/// Typed events produced by the inbound demultiplexer.
pub mod events;
/// Message-id correlation table for request/response matching.
pub mod pending;
/// Relay connection manager and the [`SwapClient`] handle.
pub mod runtime;
/// JSEP-style signaling state machine and send gating.
pub mod state;

pub use config::{ClientConfig, ReconnectConfig, SecurityConfig};
pub use error::ClientError;
pub use events::SwapEvent;
pub use pending::PendingResponses;
pub use runtime::{ConnStatus, ResponseBody, SwapClient};
pub use state::{SignalingState, StateEvent};
