use std::collections::HashMap;
use std::time::SystemTime;

/// An active peer pair recorded when an `accept` is relayed.
#[derive(Debug, Clone)]
pub struct Session {
    /// Lexicographically smaller endpoint id.
    pub a: String,
    /// Lexicographically larger endpoint id.
    pub b: String,
    /// Creation time.
    pub created_at: SystemTime,
}

impl Session {
    /// The other endpoint of the pair, if `endpoint_id` participates.
    #[must_use]
    pub fn peer_of(&self, endpoint_id: &str) -> Option<&str> {
        if self.a == endpoint_id {
            Some(&self.b)
        } else if self.b == endpoint_id {
            Some(&self.a)
        } else {
            None
        }
    }
}

fn pair_key(a: &str, b: &str) -> String {
    let (x, y) = if a <= b { (a, b) } else { (b, a) };
    format!("{x}|{y}")
}

/// Registry of active sessions keyed by the unordered endpoint pair.
///
/// The manager records relationships only; it never owns transports.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<String, Session>,
}

impl SessionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a session between two endpoints. Idempotent by pair key.
    pub fn create(&mut self, a: &str, b: &str) {
        let (x, y) = if a <= b { (a, b) } else { (b, a) };
        self.sessions
            .entry(pair_key(a, b))
            .or_insert_with(|| Session {
                a: x.to_string(),
                b: y.to_string(),
                created_at: SystemTime::now(),
            });
    }

    /// Looks up the session between two endpoints, in either order.
    #[must_use]
    pub fn get(&self, a: &str, b: &str) -> Option<&Session> {
        self.sessions.get(&pair_key(a, b))
    }

    /// Removes the session between two endpoints, returning it if present.
    pub fn remove(&mut self, a: &str, b: &str) -> Option<Session> {
        self.sessions.remove(&pair_key(a, b))
    }

    /// Every session the endpoint participates in.
    #[must_use]
    pub fn list_for(&self, endpoint_id: &str) -> Vec<Session> {
        self.sessions
            .values()
            .filter(|s| s.a == endpoint_id || s.b == endpoint_id)
            .cloned()
            .collect()
    }

    /// Number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` when no session is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
