//! Transaction-id lifecycle and reply correlation.
//!
//! Outbound requests register a pending entry under their 8-bit transaction
//! id and receive a oneshot receiver for the reply. Every entry leaves the
//! table exactly one way: completion delivers the reply, cancellation closes
//! the channel, or the per-entry timer reclaims the id and the waiter
//! observes the closed channel. Ids come from a wrapping counter with no
//! collision check; registration refuses an id that is still pending rather
//! than overwriting it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::TransactionError;
use crate::message::InboundMessage;

/// Snapshot of one pending request
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Transaction id of the request
    pub tx_id: u8,
    /// Kind of the outbound message
    pub kind: String,
    /// When the request was registered
    pub created_at: Instant,
    /// Reply deadline measured from `created_at`
    pub timeout: Duration,
}

#[derive(Debug)]
struct PendingEntry {
    info: PendingRequest,
    reply: oneshot::Sender<InboundMessage>,
    timer: JoinHandle<()>,
    // distinguishes this registration from a later reuse of the same id, so
    // a raced timer never reclaims its successor
    generation: u64,
}

/// Tracks pending request/reply exchanges for one link
#[derive(Debug, Default)]
pub struct TransactionManager {
    next_id: AtomicU8,
    pending: Arc<DashMap<u8, PendingEntry>>,
    generation: AtomicU64,
}

impl TransactionManager {
    /// Create an empty manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next transaction id from the wrapping counter
    pub fn allocate(&self) -> u8 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a pending request and receive the reply channel.
    ///
    /// Spawns a timer that reclaims the entry after `timeout`; the waiter
    /// then observes the closed channel.
    pub fn register(
        &self,
        tx_id: u8,
        kind: &str,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<InboundMessage>, TransactionError> {
        let (sender, receiver) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        match self.pending.entry(tx_id) {
            Entry::Occupied(_) => Err(TransactionError::Duplicate(tx_id)),
            Entry::Vacant(slot) => {
                let pending = Arc::clone(&self.pending);
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if let Some((_, entry)) =
                        pending.remove_if(&tx_id, |_, entry| entry.generation == generation)
                    {
                        // reply sender drops here, waking the waiter
                        debug!(tx_id, kind = %entry.info.kind, "transaction timed out");
                    }
                });

                slot.insert(PendingEntry {
                    info: PendingRequest {
                        tx_id,
                        kind: kind.to_string(),
                        created_at: Instant::now(),
                        timeout,
                    },
                    reply: sender,
                    timer,
                    generation,
                });

                debug!(tx_id, kind, timeout_ms = timeout.as_millis() as u64, "registered transaction");
                Ok(receiver)
            }
        }
    }

    /// Deliver a reply to its waiter and retire the id.
    ///
    /// A waiter that already gave up is not an error; the reply is dropped.
    pub fn complete(&self, tx_id: u8, reply: InboundMessage) -> Result<(), TransactionError> {
        let (_, entry) = self
            .pending
            .remove(&tx_id)
            .ok_or(TransactionError::Unknown(tx_id))?;

        entry.timer.abort();
        if entry.reply.send(reply).is_err() {
            debug!(tx_id, "reply arrived after the waiter departed");
        }
        Ok(())
    }

    /// Retire one pending id without delivery, returning whether it existed
    pub fn cancel(&self, tx_id: u8) -> bool {
        match self.pending.remove(&tx_id) {
            Some((_, entry)) => {
                entry.timer.abort();
                debug!(tx_id, "cancelled transaction");
                true
            }
            None => false,
        }
    }

    /// Retire every pending id without delivery, returning how many there
    /// were. Waiters observe closed channels.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        self.pending.retain(|_, entry| {
            entry.timer.abort();
            cancelled += 1;
            false
        });

        if cancelled > 0 {
            debug!(cancelled, "cancelled all pending transactions");
        }
        cancelled
    }

    /// Whether an id is currently pending
    #[must_use]
    pub fn is_pending(&self, tx_id: u8) -> bool {
        self.pending.contains_key(&tx_id)
    }

    /// Snapshot of one pending request
    #[must_use]
    pub fn pending_request(&self, tx_id: u8) -> Option<PendingRequest> {
        self.pending.get(&tx_id).map(|entry| entry.info.clone())
    }

    /// Number of pending requests
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    fn reply(tx_id: u8) -> InboundMessage {
        InboundMessage {
            channel: Channel::Control,
            tx_id,
            kind: "status.reply".to_string(),
            body: vec![0x01],
        }
    }

    #[test]
    fn test_allocate_covers_the_id_space() {
        let manager = TransactionManager::new();
        let mut seen = [false; 256];
        for _ in 0..256 {
            seen[manager.allocate() as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
        // wraps back around
        assert_eq!(manager.allocate(), 0);
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let manager = TransactionManager::new();
        let receiver = manager
            .register(5, "status.read", Duration::from_secs(10))
            .unwrap();
        assert!(manager.is_pending(5));

        manager.complete(5, reply(5)).unwrap();
        assert!(!manager.is_pending(5));

        let delivered = receiver.await.unwrap();
        assert_eq!(delivered.tx_id, 5);
        assert_eq!(delivered.kind, "status.reply");
    }

    #[tokio::test]
    async fn test_duplicate_registration_refused() {
        let manager = TransactionManager::new();
        let receiver = manager
            .register(7, "status.read", Duration::from_secs(10))
            .unwrap();

        assert!(matches!(
            manager.register(7, "status.read", Duration::from_secs(10)),
            Err(TransactionError::Duplicate(7))
        ));

        // the original stays deliverable
        manager.complete(7, reply(7)).unwrap();
        assert!(receiver.await.is_ok());
    }

    #[tokio::test]
    async fn test_complete_unknown() {
        let manager = TransactionManager::new();
        assert!(matches!(
            manager.complete(9, reply(9)),
            Err(TransactionError::Unknown(9))
        ));
    }

    #[tokio::test]
    async fn test_timeout_reclaims_the_id() {
        let manager = TransactionManager::new();
        let receiver = manager
            .register(5, "status.read", Duration::from_millis(50))
            .unwrap();

        // the waiter observes closure, not a reply
        assert!(receiver.await.is_err());
        assert!(!manager.is_pending(5));
        assert!(manager.pending_request(5).is_none());

        // the id is registrable again
        assert!(
            manager
                .register(5, "status.read", Duration::from_secs(10))
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_fast_reuse_survives_the_stale_timer() {
        let manager = TransactionManager::new();
        let _stale = manager
            .register(3, "status.read", Duration::from_millis(20))
            .unwrap();

        manager.complete(3, reply(3)).unwrap();
        let receiver = manager
            .register(3, "history.read", Duration::from_secs(10))
            .unwrap();

        // outlive the first registration's timer deadline
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(manager.is_pending(3), "stale timer reclaimed its successor");

        manager.complete(3, reply(3)).unwrap();
        assert!(receiver.await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_closes_the_waiter() {
        let manager = TransactionManager::new();
        let receiver = manager
            .register(8, "status.read", Duration::from_secs(10))
            .unwrap();

        assert!(manager.cancel(8));
        assert!(!manager.cancel(8));
        assert!(receiver.await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let manager = TransactionManager::new();
        let receivers: Vec<_> = (0..4)
            .map(|tx| {
                manager
                    .register(tx, "status.read", Duration::from_secs(10))
                    .unwrap()
            })
            .collect();

        assert_eq!(manager.cancel_all(), 4);
        assert_eq!(manager.pending_count(), 0);
        for receiver in receivers {
            assert!(receiver.await.is_err());
        }
    }

    #[tokio::test]
    async fn test_pending_request_snapshot() {
        let manager = TransactionManager::new();
        manager
            .register(12, "history.read", Duration::from_secs(10))
            .unwrap();

        let info = manager.pending_request(12).unwrap();
        assert_eq!(info.tx_id, 12);
        assert_eq!(info.kind, "history.read");
        assert_eq!(info.timeout, Duration::from_secs(10));
        assert!(info.created_at.elapsed() < Duration::from_secs(1));
    }
}
