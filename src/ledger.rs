//! Dedup ledger: which task identities are in flight, which recently finished.
//!
//! `forwarded` holds identities admitted to the worker pool and not yet
//! resolved. `completed` holds identities that finished successfully and
//! are still being echoed by the source. Both sets sit behind one lock, so
//! moving an identity from `forwarded` to `completed` is never observed
//! half-done by an admission check.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info};

/// Result of checking a candidate against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// In neither set.
    New,
    /// Still running from an earlier admission.
    InFlight,
    /// Finished successfully and still reported by the source.
    RecentlyCompleted,
}

impl Admission {
    pub fn is_new(self) -> bool {
        self == Admission::New
    }

    /// Metric label for a rejection; `None` for [`Admission::New`].
    pub fn rejection_label(self) -> Option<&'static str> {
        match self {
            Admission::New => None,
            Admission::InFlight => Some("in_flight"),
            Admission::RecentlyCompleted => Some("recently_completed"),
        }
    }

    /// Log why a candidate was discarded. Does nothing for [`Admission::New`].
    pub fn log_rejection(self, task: &dyn fmt::Debug) {
        match self {
            Admission::New => {}
            Admission::InFlight => {
                info!(task = ?task, "task is duplicated (already in flight), discarding")
            }
            Admission::RecentlyCompleted => {
                info!(task = ?task, "task recently completed, discarding")
            }
        }
    }
}

/// Point-in-time sizes of both sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub forwarded: usize,
    pub completed: usize,
}

struct Sets<T> {
    forwarded: HashSet<Arc<T>>,
    completed: HashSet<Arc<T>>,
}

impl<T: Eq + Hash> Sets<T> {
    fn classify(&self, id: &T) -> Admission {
        if self.forwarded.contains(id) {
            Admission::InFlight
        } else if self.completed.contains(id) {
            Admission::RecentlyCompleted
        } else {
            Admission::New
        }
    }
}

pub struct DedupLedger<T> {
    sets: Mutex<Sets<T>>,
}

impl<T> Default for DedupLedger<T> {
    fn default() -> Self {
        Self {
            sets: Mutex::new(Sets {
                forwarded: HashSet::new(),
                completed: HashSet::new(),
            }),
        }
    }
}

impl<T: Eq + Hash + fmt::Debug> DedupLedger<T> {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves both sets consistent (every
    // mutation is a single insert/remove pair), so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Sets<T>> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify a candidate without changing the ledger.
    pub fn check(&self, id: &T) -> Admission {
        self.lock().classify(id)
    }

    /// True when the candidate is in neither set. Logs the rejection reason.
    pub fn admit(&self, id: &T) -> bool {
        let admission = self.check(id);
        admission.log_rejection(id);
        admission.is_new()
    }

    /// Check and mark forwarded in one step.
    ///
    /// Returns [`Admission::New`] only if this call inserted the identity.
    pub fn try_forward(&self, id: Arc<T>) -> Admission {
        let mut sets = self.lock();
        let admission = sets.classify(&id);
        if admission.is_new() {
            sets.forwarded.insert(id);
        }
        admission
    }

    pub fn mark_forwarded(&self, id: Arc<T>) {
        self.lock().forwarded.insert(id);
    }

    /// Release an identity after a failed attempt; it may be admitted again.
    pub fn mark_failed(&self, id: &T) {
        self.lock().forwarded.remove(id);
    }

    pub fn mark_completed(&self, id: Arc<T>) {
        let mut sets = self.lock();
        sets.forwarded.remove(&*id);
        sets.completed.insert(id);
    }

    /// Forget completed identities the source no longer returns.
    ///
    /// Returns how many completed identities remain.
    pub fn prune_completed(&self, still_returned: &HashSet<Arc<T>>) -> usize {
        let mut sets = self.lock();
        let before = sets.completed.len();
        sets.completed.retain(|id| {
            let keep = still_returned.contains(id);
            if keep {
                debug!(task = ?id, "completed task still returned by the source, keeping it");
            }
            keep
        });
        let remaining = sets.completed.len();
        if before != remaining {
            debug!(released = before - remaining, remaining, "pruned completed tasks");
        }
        remaining
    }

    pub fn is_forwarded(&self, id: &T) -> bool {
        self.lock().forwarded.contains(id)
    }

    pub fn is_completed(&self, id: &T) -> bool {
        self.lock().completed.contains(id)
    }

    pub fn forwarded_len(&self) -> usize {
        self.lock().forwarded.len()
    }

    pub fn completed_len(&self) -> usize {
        self.lock().completed.len()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let sets = self.lock();
        LedgerSnapshot {
            forwarded: sets.forwarded.len(),
            completed: sets.completed.len(),
        }
    }
}
