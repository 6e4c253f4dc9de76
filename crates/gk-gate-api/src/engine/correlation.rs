//! Correlation table: requestId → pending ack handle.
//!
//! An entry is resolved at most once. Removing it from the map under the
//! lock is the point where an ack, the deadline or the caller dropping out
//! wins; whoever finds the entry gone becomes a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use gk_protocol::AckMessage;

struct PendingEntry {
    tx: oneshot::Sender<AckMessage>,
    created_at: Instant,
}

/// What happened to an inbound ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDisposition {
    /// Matched a pending attempt and resolved it.
    Applied,
    /// No pending attempt with this id: unknown, late or duplicate.
    Discarded,
}

/// Registering an id that is already pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("request {0} is already pending")]
pub struct AlreadyPending(pub Uuid);

#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<Uuid, PendingEntry>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `request_id` with a deadline `timeout` from now.
    pub fn register(
        self: &Arc<Self>,
        request_id: Uuid,
        timeout: Duration,
    ) -> Result<PendingAck, AlreadyPending> {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();

        let mut entries = self.entries();
        if entries.contains_key(&request_id) {
            return Err(AlreadyPending(request_id));
        }
        entries.insert(
            request_id,
            PendingEntry {
                tx,
                created_at: now,
            },
        );

        Ok(PendingAck {
            request_id,
            deadline: now + timeout,
            rx,
            table: Arc::clone(self),
        })
    }

    /// Deliver an ack to its pending attempt. First ack wins.
    pub fn resolve(&self, ack: AckMessage) -> AckDisposition {
        let mut entries = self.entries();
        let Some(entry) = entries.remove(&ack.request_id) else {
            return AckDisposition::Discarded;
        };
        tracing::debug!(
            request_id = %ack.request_id,
            waited_ms = entry.created_at.elapsed().as_millis() as u64,
            "ack matched pending request"
        );
        // Sent while the lock is held so a concurrent deadline that finds the
        // entry gone is guaranteed to see the value.
        match entry.tx.send(ack) {
            Ok(()) => AckDisposition::Applied,
            Err(_) => AckDisposition::Discarded,
        }
    }

    /// Remove an entry without resolving it. Returns false if it was
    /// already gone.
    pub fn cancel(&self, request_id: &Uuid) -> bool {
        self.entries().remove(request_id).is_some()
    }

    pub fn is_pending(&self, request_id: &Uuid) -> bool {
        self.entries().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The caller's side of one pending entry.
///
/// Dropping it removes the entry, so an abandoned attempt never leaks.
pub struct PendingAck {
    request_id: Uuid,
    deadline: Instant,
    rx: oneshot::Receiver<AckMessage>,
    table: Arc<CorrelationTable>,
}

impl PendingAck {
    /// When `wait` gives up. Also bounds the publish that precedes it.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the ack until the deadline. `None` means timed out.
    pub async fn wait(mut self) -> Option<AckMessage> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(ack)) => Some(ack),
            // Sender dropped: entry was cancelled.
            Ok(Err(_)) => None,
            Err(_) => {
                if self.table.cancel(&self.request_id) {
                    None
                } else {
                    // An ack removed the entry just as the deadline fired.
                    self.rx.try_recv().ok()
                }
            }
        }
    }
}

impl Drop for PendingAck {
    fn drop(&mut self) {
        self.table.cancel(&self.request_id);
    }
}
