//! Correlation table for outbound requests awaiting a `response`.
//!
//! An entry lives from [`PendingResponses::register`] until the
//! correlating response arrives, the caller's timeout expires, or the
//! transport closes underneath it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use crate::error::ClientError;
use crate::runtime::ResponseBody;

type Completion = oneshot::Sender<Result<ResponseBody, ClientError>>;

/// In-flight requests keyed by their `message_id`.
#[derive(Debug, Default)]
pub struct PendingResponses {
    entries: Mutex<HashMap<u64, Completion>>,
}

impl PendingResponses {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Completion>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a pending request and returns its completion receiver.
    ///
    /// A second registration under the same id displaces the first,
    /// whose receiver then observes a dropped sender.
    pub fn register(
        &self,
        message_id: u64,
    ) -> oneshot::Receiver<Result<ResponseBody, ClientError>> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(message_id, tx);
        rx
    }

    /// Completes and removes the entry for `message_id`. Returns `false`
    /// when nothing was pending under that id (already resolved, timed
    /// out, or never registered).
    pub fn resolve(&self, message_id: u64, result: Result<ResponseBody, ClientError>) -> bool {
        match self.lock().remove(&message_id) {
            Some(completion) => {
                // The caller may have stopped waiting; a failed delivery
                // still removes the entry.
                let _ = completion.send(result);
                true
            }
            None => false,
        }
    }

    /// Fails every pending entry and drains the table. Called when the
    /// transport closes with requests still in flight.
    pub fn fail_all(&self, err: impl Fn() -> ClientError) {
        let drained: Vec<Completion> = self.lock().drain().map(|(_, tx)| tx).collect();
        for completion in drained {
            let _ = completion.send(Err(err()));
        }
    }

    /// Number of requests still awaiting a response.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_body(response_to: u64) -> Result<ResponseBody, ClientError> {
        Ok(ResponseBody {
            response_to,
            status: 200,
            reason: "ok".to_string(),
            error: None,
        })
    }

    #[tokio::test]
    async fn resolve_completes_the_registered_receiver() {
        let pending = PendingResponses::new();
        let rx = pending.register(7);
        assert!(pending.resolve(7, ok_body(7)));
        let body = rx.await.unwrap().unwrap();
        assert_eq!(body.response_to, 7);
        assert!(pending.is_empty());
    }

    #[test]
    fn resolve_without_entry_returns_false() {
        let pending = PendingResponses::new();
        assert!(!pending.resolve(1, ok_body(1)));
    }

    #[tokio::test]
    async fn duplicate_registration_displaces_the_first() {
        let pending = PendingResponses::new();
        let first = pending.register(3);
        let second = pending.register(3);
        assert_eq!(pending.len(), 1);
        assert!(first.await.is_err());
        assert!(pending.resolve(3, ok_body(3)));
        assert!(second.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn fail_all_drains_every_entry() {
        let pending = PendingResponses::new();
        let a = pending.register(1);
        let b = pending.register(2);
        pending.fail_all(|| ClientError::Disconnected);
        assert!(pending.is_empty());
        assert!(matches!(a.await.unwrap(), Err(ClientError::Disconnected)));
        assert!(matches!(b.await.unwrap(), Err(ClientError::Disconnected)));
    }

    #[test]
    fn resolving_after_the_caller_gave_up_still_removes_the_entry() {
        let pending = PendingResponses::new();
        let rx = pending.register(9);
        drop(rx);
        assert!(pending.resolve(9, ok_body(9)));
        assert!(pending.is_empty());
    }
}
