//! requestId idempotency window.
//!
//! A requestId is claimed for the duration of its attempt and, once the
//! attempt resolves with a published outcome, remembered for a TTL so a
//! client retry with the same id replays the first outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use super::outcome::GateOutcome;

enum Entry {
    Pending {
        user_id: String,
    },
    Resolved {
        user_id: String,
        outcome: GateOutcome,
        expires_at: Instant,
    },
}

impl Entry {
    fn user_id(&self) -> &str {
        match self {
            Entry::Pending { user_id } | Entry::Resolved { user_id, .. } => user_id,
        }
    }
}

type Entries = Arc<Mutex<HashMap<Uuid, Entry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<Uuid, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of trying to start an attempt under a requestId.
pub enum Begin {
    /// The id is ours until the claim is completed or dropped.
    Started(Claim),
    /// Same user, same id, already resolved inside the window.
    Replay(GateOutcome),
    /// The id is pending, or belongs to another user.
    Conflict,
}

pub struct IdempotencyCache {
    entries: Entries,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn begin(&self, request_id: Uuid, user_id: &str) -> Begin {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        entries.retain(|_, entry| match entry {
            Entry::Resolved { expires_at, .. } => *expires_at > now,
            Entry::Pending { .. } => true,
        });

        match entries.get(&request_id) {
            Some(Entry::Resolved {
                user_id: owner,
                outcome,
                ..
            }) if owner == user_id => Begin::Replay(outcome.clone()),
            Some(_) => Begin::Conflict,
            None => {
                entries.insert(
                    request_id,
                    Entry::Pending {
                        user_id: user_id.to_string(),
                    },
                );
                Begin::Started(Claim {
                    request_id,
                    ttl: self.ttl,
                    entries: Arc::clone(&self.entries),
                    done: false,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive hold on a requestId while its attempt runs.
///
/// Dropped without `complete`, the id is forgotten and may be reused.
pub struct Claim {
    request_id: Uuid,
    ttl: Duration,
    entries: Entries,
    done: bool,
}

impl Claim {
    /// Remember a replayable outcome for the TTL; forget anything else.
    pub fn complete(mut self, outcome: &GateOutcome) {
        self.done = true;
        let mut entries = lock(&self.entries);
        if !outcome.is_replayable() {
            entries.remove(&self.request_id);
            return;
        }
        if let Some(entry) = entries.get_mut(&self.request_id) {
            let user_id = entry.user_id().to_string();
            *entry = Entry::Resolved {
                user_id,
                outcome: outcome.clone(),
                expires_at: Instant::now() + self.ttl,
            };
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.done {
            lock(&self.entries).remove(&self.request_id);
        }
    }
}
