//! Registry of in-flight calls awaiting a reply.
//!
//! Three independent paths touch this table: callers registering new calls,
//! the reader resolving replies, and timeouts cancelling their own entries.
//! All of them go through the one mutex in [`PendingCalls`]; no operation
//! holds it across an await or while delivering to a slot.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::ipc::error::RegistryError;
use crate::ipc::protocol::Reply;

/// What a waiting caller receives through its reply slot.
#[derive(Debug)]
pub enum Settlement {
    Reply(Reply),
    /// The client shut down before a reply arrived.
    ShutDown,
}

#[derive(Default)]
struct Inner {
    calls: HashMap<u64, oneshot::Sender<Settlement>>,
    closed: bool,
}

/// Maps call identifiers to single-use reply slots.
#[derive(Default)]
pub struct PendingCalls {
    inner: Mutex<Inner>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing panics while the lock is held; recover the map regardless.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new pending call.
    ///
    /// Returns a receiver that is settled exactly once: by a reply, or by
    /// shutdown. A cancelled call's receiver is simply dropped by its owner.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Duplicate` if `id` is already outstanding
    /// - `RegistryError::Closed` once [`drain_all`](Self::drain_all) has run
    pub fn register(&self, id: u64) -> Result<oneshot::Receiver<Settlement>, RegistryError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(RegistryError::Closed);
        }
        if inner.calls.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        let (tx, rx) = oneshot::channel();
        inner.calls.insert(id, tx);
        Ok(rx)
    }

    /// Deliver a reply to the call registered under `id` and remove it.
    ///
    /// A reply for an unknown id (late, duplicate, or never issued) is
    /// logged and dropped. Returns whether a slot was found.
    pub fn resolve(&self, id: u64, reply: Reply) -> bool {
        let slot = self.lock().calls.remove(&id);
        match slot {
            Some(tx) => {
                // Receiver may already be gone if the caller's future was dropped
                if tx.send(Settlement::Reply(reply)).is_err() {
                    debug!("Caller for call {} went away before its reply", id);
                }
                true
            }
            None => {
                warn!("No pending call for reply with id {}", id);
                false
            }
        }
    }

    /// Remove a pending call without delivering anything.
    ///
    /// Used on timeout, so a reply arriving later finds no slot.
    pub fn cancel(&self, id: u64) -> bool {
        self.lock().calls.remove(&id).is_some()
    }

    /// Release every pending call with a shutdown signal and close the
    /// registry to new registrations. Returns the number of calls released.
    pub fn drain_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.calls.drain().collect()
        };

        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Settlement::ShutDown);
        }
        count
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::id::RequestId;
    use serde_json::json;

    fn reply(id: u64) -> Reply {
        Reply {
            id: RequestId::Number(id),
            outcome: Ok(json!({"id": id})),
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let pending = PendingCalls::new();

        let mut rx = pending.register(1).unwrap();
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve(1, reply(1)));

        // Should be removed after completion
        assert!(pending.is_empty());

        match rx.try_recv().unwrap() {
            Settlement::Reply(received) => assert_eq!(received, reply(1)),
            other => panic!("Expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let pending = PendingCalls::new();
        let _rx = pending.register(7).unwrap();

        assert_eq!(pending.register(7).unwrap_err(), RegistryError::Duplicate(7));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_cancel() {
        let pending = PendingCalls::new();

        let _rx = pending.register(2).unwrap();
        assert!(pending.cancel(2));
        assert!(pending.is_empty());

        // Second cancel and a late reply are both no-ops
        assert!(!pending.cancel(2));
        assert!(!pending.resolve(2, reply(2)));
    }

    #[test]
    fn test_resolve_unknown_id_leaves_others_untouched() {
        let pending = PendingCalls::new();
        let mut rx = pending.register(3).unwrap();

        assert!(!pending.resolve(99, reply(99)));
        assert_eq!(pending.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_second_reply_is_noop() {
        let pending = PendingCalls::new();
        let _rx = pending.register(4).unwrap();

        assert!(pending.resolve(4, reply(4)));
        assert!(!pending.resolve(4, reply(4)));
    }

    #[test]
    fn test_resolve_after_receiver_dropped() {
        let pending = PendingCalls::new();
        let rx = pending.register(5).unwrap();
        drop(rx);

        assert!(pending.resolve(5, reply(5)));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_drain_all_releases_and_closes() {
        let pending = PendingCalls::new();
        let mut receivers: Vec<_> = (1..=3).map(|id| pending.register(id).unwrap()).collect();

        assert_eq!(pending.drain_all(), 3);
        assert!(pending.is_empty());
        assert!(pending.is_closed());

        for rx in receivers.iter_mut() {
            assert!(matches!(rx.try_recv().unwrap(), Settlement::ShutDown));
        }

        assert_eq!(pending.register(4).unwrap_err(), RegistryError::Closed);
        assert_eq!(pending.drain_all(), 0);
    }

    #[test]
    fn test_concurrent_register_resolve_cancel() {
        use std::sync::Arc;

        let pending = Arc::new(PendingCalls::new());
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let pending = Arc::clone(&pending);
                std::thread::spawn(move || {
                    for i in 0..500u64 {
                        let id = t * 1000 + i + 1;
                        let _rx = pending.register(id).unwrap();
                        if i % 2 == 0 {
                            assert!(pending.resolve(id, reply(id)));
                        } else {
                            assert!(pending.cancel(id));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pending.is_empty());
    }
}
