use std::collections::HashMap;

use swap_common::{Capabilities, Criterion, Message, SecurityCaps};

use crate::matcher::Matcher;
use crate::sessions::SessionManager;

/// A registered endpoint's advertised criteria and capabilities.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Criteria set advertised in `register`.
    pub criteria: Vec<Criterion>,
    /// Capabilities advertised in `register`.
    pub capabilities: Capabilities,
}

/// A `connect` awaiting its `accept` or `reject`. One in flight per
/// requestor.
#[derive(Debug, Clone)]
pub struct PendingConnect {
    /// The endpoint selected by the matcher.
    pub target: String,
    /// The `message_id` of the original `connect`.
    pub message_id: u64,
}

/// A synthesized `close` to deliver after a disconnect, together with
/// the surviving peer and its security capabilities.
#[derive(Debug)]
pub struct PeerClose {
    /// The surviving peer to notify.
    pub peer: String,
    /// The peer's advertised envelope support.
    pub caps: SecurityCaps,
    /// The `close` authored by the disconnected endpoint.
    pub message: Message,
}

/// All relay-side signaling state: registrations, the matcher registry,
/// active sessions, pending connects, and last-seen message ids.
///
/// The whole directory sits behind one lock in `ServerState` so that a
/// dispatch mutation and its dependent lookups are a single critical
/// section, and disconnect cleanup is atomic with routing-table removal.
#[derive(Debug, Default)]
pub struct Directory {
    registrations: HashMap<String, Registration>,
    /// Criteria registry used for `connect` target selection.
    pub matcher: Matcher,
    /// Active peer-pair sessions.
    pub sessions: SessionManager,
    pending_connects: HashMap<String, PendingConnect>,
    last_message_ids: HashMap<String, u64>,
}

impl Directory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts an endpoint registration and its matcher entry.
    pub fn register(&mut self, endpoint_id: &str, criteria: Vec<Criterion>, capabilities: Capabilities) {
        self.matcher.register(endpoint_id, &criteria);
        self.registrations.insert(
            endpoint_id.to_string(),
            Registration {
                criteria,
                capabilities,
            },
        );
    }

    /// The registration for an endpoint, if any.
    #[must_use]
    pub fn registration(&self, endpoint_id: &str) -> Option<&Registration> {
        self.registrations.get(endpoint_id)
    }

    /// The security capabilities an endpoint advertised; defaults to
    /// none for unregistered endpoints.
    #[must_use]
    pub fn capabilities_of(&self, endpoint_id: &str) -> SecurityCaps {
        self.registrations
            .get(endpoint_id)
            .map(|r| r.capabilities.security)
            .unwrap_or_default()
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.registrations.len()
    }

    /// Records the highest message id seen from a source. Used to author
    /// synthesized `close` messages on disconnect.
    pub fn record_message(&mut self, source_id: &str, message_id: u64) {
        let last = self.last_message_ids.entry(source_id.to_string()).or_insert(0);
        if message_id > *last {
            *last = message_id;
        }
    }

    /// Stores the pending connect for a requestor, replacing any earlier
    /// one still in flight.
    pub fn put_pending(&mut self, requestor: &str, target: &str, message_id: u64) {
        self.pending_connects.insert(
            requestor.to_string(),
            PendingConnect {
                target: target.to_string(),
                message_id,
            },
        );
    }

    /// Removes and returns the pending connect for a requestor.
    pub fn take_pending(&mut self, requestor: &str) -> Option<PendingConnect> {
        self.pending_connects.remove(requestor)
    }

    /// Tears down every trace of a disconnected endpoint: registration,
    /// matcher entry, pending connect, and all sessions it participates
    /// in. Returns one synthesized `close` (authored by the disconnected
    /// endpoint) per surviving peer.
    pub fn remove_endpoint(&mut self, endpoint_id: &str) -> Vec<PeerClose> {
        self.registrations.remove(endpoint_id);
        self.matcher.unregister(endpoint_id);
        self.pending_connects.remove(endpoint_id);

        let mut next_id = self
            .last_message_ids
            .remove(endpoint_id)
            .unwrap_or_default();
        let mut closures = Vec::new();
        for session in self.sessions.list_for(endpoint_id) {
            let Some(peer) = session.peer_of(endpoint_id) else {
                continue;
            };
            let peer = peer.to_string();
            self.sessions.remove(&session.a, &session.b);
            next_id += 1;
            closures.push(PeerClose {
                caps: self.capabilities_of(&peer),
                message: Message::close(endpoint_id, next_id, &peer),
                peer,
            });
        }
        closures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(integrity: bool, encryption: bool) -> Capabilities {
        Capabilities {
            security: SecurityCaps {
                integrity,
                encryption,
            },
        }
    }

    #[test]
    fn register_updates_matcher_and_capabilities() {
        let mut dir = Directory::new();
        dir.register(
            "alpha-00112233",
            vec![Criterion::new("service", "video")],
            caps(true, false),
        );
        assert_eq!(dir.registered_count(), 1);
        assert!(dir.capabilities_of("alpha-00112233").integrity);
        assert_eq!(
            dir.matcher
                .find_matches(&[Criterion::new("service", "video")])
                .len(),
            1
        );
    }

    #[test]
    fn capabilities_default_to_none_for_unknown_endpoints() {
        let dir = Directory::new();
        assert!(!dir.capabilities_of("ghost-00112233").any());
    }

    #[test]
    fn pending_connect_is_single_flight_per_requestor() {
        let mut dir = Directory::new();
        dir.put_pending("alpha-00112233", "bravo-00112233", 3);
        dir.put_pending("alpha-00112233", "carol-00112233", 4);
        let pending = dir.take_pending("alpha-00112233").unwrap();
        assert_eq!(pending.target, "carol-00112233");
        assert_eq!(pending.message_id, 4);
        assert!(dir.take_pending("alpha-00112233").is_none());
    }

    #[test]
    fn remove_endpoint_clears_every_table() {
        let mut dir = Directory::new();
        dir.register("alpha-00112233", vec![], Capabilities::default());
        dir.register("bravo-00112233", vec![], Capabilities::default());
        dir.record_message("alpha-00112233", 5);
        dir.put_pending("alpha-00112233", "bravo-00112233", 5);
        dir.sessions.create("alpha-00112233", "bravo-00112233");

        let closures = dir.remove_endpoint("alpha-00112233");

        assert!(dir.registration("alpha-00112233").is_none());
        assert!(dir.matcher.find_matches(&[]).iter().all(|id| id != "alpha-00112233"));
        assert!(dir.sessions.is_empty());
        assert_eq!(closures.len(), 1);
        let close = &closures[0];
        assert_eq!(close.peer, "bravo-00112233");
        assert_eq!(close.message.source_id, "alpha-00112233");
        assert_eq!(close.message.message_id, 6);
        assert_eq!(close.message.target(), Some("bravo-00112233"));
    }

    #[test]
    fn synthesized_closes_use_increasing_ids_across_sessions() {
        let mut dir = Directory::new();
        dir.record_message("alpha-00112233", 2);
        dir.sessions.create("alpha-00112233", "bravo-00112233");
        dir.sessions.create("alpha-00112233", "carol-00112233");

        let closures = dir.remove_endpoint("alpha-00112233");
        let mut ids: Vec<u64> = closures.iter().map(|c| c.message.message_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![3, 4]);
    }
}
