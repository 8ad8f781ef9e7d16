//! Common types and utilities shared across the SWAP v1 protocol stack.
//!
//! This crate provides:
//! - The message model and per-kind factories ([`message`])
//! - Pure wire-shape validation ([`validate`])
//! - Canonical JSON serialization for signing ([`canonical`])
//! - The hop-by-hop security envelope ([`envelope`])
//! - Problem Details error bodies ([`problem`])
//! - Syntactic SDP guards ([`sdp`])
//! - Source identifiers and message-id counters ([`ids`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod canonical;
pub mod envelope;
pub mod ids;
pub mod message;
pub mod problem;
pub mod sdp;
pub mod types;
pub mod validate;

pub use envelope::{EnvelopeError, KeyMaterial, SecurityEnvelope};
pub use message::{Body, Capabilities, Criterion, Message, MessageError, SecurityCaps};
pub use problem::{ErrorKind, ProblemDetails};
