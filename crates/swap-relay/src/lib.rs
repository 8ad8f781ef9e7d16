//! SWAP v1 signaling relay — stateless WebSocket message router for
//! WebRTC offer/answer exchange.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and relay configuration.
pub mod config;
mod connection;
/// Registrations, matcher, sessions, and pending-connect bookkeeping.
pub mod directory;
/// Error types for relay operations.
pub mod error;
/// Criteria registry and specificity-weighted peer selection.
pub mod matcher;
/// Health endpoint and Prometheus metrics.
pub mod metrics;
/// Source-id based routing table for connected endpoints.
pub mod router;
/// Accept loop and shared server state.
pub mod server;
/// Pair-symmetric session bookkeeping.
pub mod sessions;
/// TLS acceptor construction from PEM files.
pub mod tls;

pub use server::{run, run_tls, ServerState};
