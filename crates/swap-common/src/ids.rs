//! Source identifier generation and per-source message-id counters.

use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::MIN_SOURCE_ID_LEN;

/// Generates a source identifier of the form `prefix-<32 hex chars>`.
///
/// The random tail makes identifiers practically unique; the result is
/// padded if a degenerate prefix would ever leave it under
/// [`MIN_SOURCE_ID_LEN`] characters.
#[must_use]
pub fn generate_source_id(prefix: &str) -> String {
    let mut tail = [0u8; 16];
    OsRng.fill_bytes(&mut tail);
    let mut id = format!("{prefix}-{}", hex::encode(tail));
    while id.len() < MIN_SOURCE_ID_LEN {
        id.push('0');
    }
    id
}

/// Monotonic message-id counter scoped to a single source.
///
/// Counters are never shared across sources; ids are strictly increasing
/// and never zero (zero is reserved for unsolicited error responses).
#[derive(Debug, Default)]
pub struct MessageIdCounter(AtomicU64);

impl MessageIdCounter {
    /// Creates a counter whose first [`next`](Self::next) returns 1.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter and returns the new value.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}
