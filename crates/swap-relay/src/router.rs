use dashmap::DashMap;
use std::time::Instant;
use tokio::sync::mpsc;

/// Handle held in the routing table — used to deliver wire frames to a
/// connection's writer task.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    /// Channel sender delivering serialized messages to the connection.
    pub tx: mpsc::Sender<String>,
    /// Source id bound to this connection.
    pub source_id: String,
    /// Instant the connection was accepted (guards stale eviction).
    pub connected_at: Instant,
}

/// Concurrent `source_id → connection` routing table.
#[derive(Debug, Default)]
pub struct Router {
    routes: DashMap<String, ConnHandle>,
}

impl Router {
    /// Creates an empty routing table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
        }
    }

    /// Inserts a connection handle, returning any displaced handle bound
    /// to the same source id.
    #[must_use]
    pub fn insert(&self, source_id: &str, handle: ConnHandle) -> Option<ConnHandle> {
        self.routes.insert(source_id.to_string(), handle)
    }

    /// Removes the entry only if it belongs to the connection accepted at
    /// the given instant.
    pub fn remove_if(&self, source_id: &str, connected_at: Instant) {
        self.routes
            .remove_if(source_id, |_k, v| v.connected_at == connected_at);
    }

    /// Looks up a connection handle by source id.
    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<ConnHandle> {
        self.routes.get(source_id).map(|entry| entry.value().clone())
    }

    /// Number of active routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_handle(source_id: &str) -> (ConnHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = ConnHandle {
            tx,
            source_id: source_id.to_string(),
            connected_at: Instant::now(),
        };
        (handle, rx)
    }

    #[test]
    fn insert_and_get_returns_handle() {
        let router = Router::new();
        let (handle, _rx) = make_handle("alpha-0011223344");

        let old = router.insert("alpha-0011223344", handle);
        assert!(old.is_none());

        let retrieved = router.get("alpha-0011223344").unwrap();
        assert_eq!(retrieved.source_id, "alpha-0011223344");
    }

    #[test]
    fn get_on_missing_key_returns_none() {
        let router = Router::new();
        assert!(router.get("absent-0011223344").is_none());
    }

    #[test]
    fn insert_same_key_replaces_old_handle() {
        let router = Router::new();
        let (handle1, _rx1) = make_handle("alpha-0011223344");
        let (handle2, _rx2) = make_handle("alpha-0011223344");

        assert!(router.insert("alpha-0011223344", handle1).is_none());
        assert!(router.insert("alpha-0011223344", handle2).is_some());
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn remove_if_with_matching_instant_removes_entry() {
        let router = Router::new();
        let (handle, _rx) = make_handle("alpha-0011223344");
        let connected_at = handle.connected_at;

        let _ = router.insert("alpha-0011223344", handle);
        router.remove_if("alpha-0011223344", connected_at);
        assert!(router.get("alpha-0011223344").is_none());
    }

    #[test]
    fn remove_if_with_other_instant_keeps_entry() {
        let router = Router::new();
        let (handle, _rx) = make_handle("alpha-0011223344");
        let connected_at = handle.connected_at;

        let _ = router.insert("alpha-0011223344", handle);
        router.remove_if(
            "alpha-0011223344",
            connected_at + std::time::Duration::from_secs(1),
        );
        assert!(router.get("alpha-0011223344").is_some());
    }

    #[test]
    fn len_and_is_empty() {
        let router = Router::new();
        assert!(router.is_empty());

        let (handle1, _rx1) = make_handle("alpha-0011223344");
        let _ = router.insert("alpha-0011223344", handle1);
        let (handle2, _rx2) = make_handle("bravo-0011223344");
        let _ = router.insert("bravo-0011223344", handle2);

        assert!(!router.is_empty());
        assert_eq!(router.len(), 2);
    }
}
