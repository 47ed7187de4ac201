//! Optimistic mutation cache.
//!
//! Holds one actor session's materialised view of each collection and runs
//! every speculative change through a single snapshot/commit/rollback state
//! machine:
//!
//! - [`OptimisticCache::apply_optimistic`] snapshots the current materialised
//!   state and applies an [`OptimisticChange`].
//! - [`OptimisticCache::commit`] drops the snapshot once the authoritative
//!   store confirmed the write.
//! - [`OptimisticCache::rollback`] restores the snapshot after a failed write.
//! - [`OptimisticCache::invalidate`] asks the caller to refetch a collection
//!   another actor changed. A refetch that lands while a mutation is in
//!   flight becomes that mutation's new baseline and the pending change is
//!   re-applied on top of it.
//! - [`OptimisticCache::invalidate_dependent`] discards a derived collection,
//!   or queues that until its own mutation resolves.
//!
//! A collection has a pending snapshot if and only if a mutation is in flight
//! for it. Calls that would break that pairing fail with [`CacheError`] and
//! leave the cache untouched.
//!
//! The cache performs no I/O and is owned by exactly one session. Sessions
//! that share it with listener handlers wrap it in [`SharedCache`].

mod change;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::debug;

use crate::domain::{CollectionKey, Record, RecordId};

pub use change::{OptimisticChange, RecordPredicate, RecordTransform};

/// Cache handle shared between the coordinator and listener handlers.
///
/// The lock is only held for synchronous cache calls, never across an await.
pub type SharedCache = Arc<Mutex<OptimisticCache>>;

/// Wrap a fresh cache in a [`SharedCache`] handle.
pub fn shared_cache() -> SharedCache {
    Arc::new(Mutex::new(OptimisticCache::new()))
}

/// Lock a shared cache, recovering the guard if a handler panicked mid-call.
pub fn lock_cache(cache: &SharedCache) -> MutexGuard<'_, OptimisticCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Caller protocol violations detected by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A mutation is already in flight for the collection.
    #[error("collection {key} already has a pending optimistic mutation")]
    MutationPending {
        /// Affected collection.
        key: CollectionKey,
    },
    /// `commit` or `rollback` was called with nothing in flight.
    #[error("collection {key} has no pending optimistic mutation")]
    NoPendingMutation {
        /// Affected collection.
        key: CollectionKey,
    },
}

/// Outcome of an invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Refetch the collection now. If a mutation is in flight the fetched
    /// records become its baseline.
    Refetch(CollectionKey),
    /// A mutation is in flight; the refetch is released when it resolves.
    Deferred(CollectionKey),
}

impl Invalidation {
    /// Key to refetch immediately, if any.
    pub fn refetch_now(&self) -> Option<&CollectionKey> {
        match self {
            Self::Refetch(key) => Some(key),
            Self::Deferred(_) => None,
        }
    }
}

/// Result of resolving a pending mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Set when the collection went stale while the mutation was in flight
    /// and no refetch has replaced it since. The collection has been
    /// discarded and must be refetched.
    pub refetch: Option<CollectionKey>,
}

#[derive(Debug)]
struct PendingMutation {
    snapshot: Vec<Record>,
    change: Arc<OptimisticChange>,
}

#[derive(Debug, Default)]
struct CacheEntry {
    committed: Vec<Record>,
    pending: Option<PendingMutation>,
    refetch_on_resolve: bool,
}

/// Per-session materialised collections with optimistic mutation support.
#[derive(Debug, Default)]
pub struct OptimisticCache {
    entries: HashMap<CollectionKey, CacheEntry>,
}

impl OptimisticCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install authoritative state for `key` (initial fetch or refetch).
    ///
    /// While a mutation is in flight, `records` replace its snapshot and the
    /// pending change is re-applied on top, so a rollback restores the
    /// fetched state and a commit keeps it plus the change.
    pub fn hydrate(&mut self, key: &CollectionKey, records: Vec<Record>) {
        let count = records.len();
        let entry = self.entries.entry(key.clone()).or_default();
        entry.refetch_on_resolve = false;
        match entry.pending.as_mut() {
            Some(pending) => {
                entry.committed = pending.change.apply(&records);
                pending.snapshot = records;
                debug!(collection = %key, count, "rebased pending change on refetched state");
            }
            None => {
                entry.committed = records;
                debug!(collection = %key, count, "hydrated collection");
            }
        }
    }

    /// Currently materialised records, or `None` when the key is unknown or
    /// was invalidated.
    pub fn records(&self, key: &CollectionKey) -> Option<&[Record]> {
        self.entries.get(key).map(|entry| entry.committed.as_slice())
    }

    /// Look up one materialised record.
    pub fn record(&self, key: &CollectionKey, id: &RecordId) -> Option<&Record> {
        self.records(key)?.iter().find(|record| record.id() == id)
    }

    /// Whether a mutation is in flight for `key`.
    pub fn is_pending(&self, key: &CollectionKey) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.pending.is_some())
    }

    /// Snapshot the materialised state of `key` and apply `change` on top.
    ///
    /// A key that has never been hydrated starts from an empty collection.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::MutationPending`] if the previous mutation for
    /// `key` has not been committed or rolled back.
    pub fn apply_optimistic(
        &mut self,
        key: &CollectionKey,
        change: impl Into<Arc<OptimisticChange>>,
    ) -> Result<(), CacheError> {
        let entry = self.entries.entry(key.clone()).or_default();
        if entry.pending.is_some() {
            return Err(CacheError::MutationPending { key: key.clone() });
        }
        let change = change.into();
        let next = change.apply(&entry.committed);
        let snapshot = std::mem::replace(&mut entry.committed, next);
        debug!(collection = %key, change = change.kind(), "applied optimistic change");
        entry.pending = Some(PendingMutation { snapshot, change });
        Ok(())
    }

    /// Keep the materialised state as the new baseline.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NoPendingMutation`] when nothing is in flight.
    pub fn commit(&mut self, key: &CollectionKey) -> Result<Resolution, CacheError> {
        let entry = self.pending_entry(key)?;
        entry.pending = None;
        debug!(collection = %key, "committed optimistic change");
        Ok(self.release_queued_refetch(key))
    }

    /// Restore the state captured by the last `apply_optimistic`, or by the
    /// last refetch installed while it was in flight.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NoPendingMutation`] when nothing is in flight.
    pub fn rollback(&mut self, key: &CollectionKey) -> Result<Resolution, CacheError> {
        let entry = self.pending_entry(key)?;
        if let Some(pending) = entry.pending.take() {
            entry.committed = pending.snapshot;
        }
        debug!(collection = %key, "rolled back optimistic change");
        Ok(self.release_queued_refetch(key))
    }

    /// Store-confirmed `record` replaces the materialised copy with the same
    /// id. Ignored while a mutation is in flight or when `key` is not cached.
    pub fn replace_committed(&mut self, key: &CollectionKey, record: Record) -> bool {
        let Some(entry) = self
            .entries
            .get_mut(key)
            .filter(|entry| entry.pending.is_none())
        else {
            return false;
        };
        let id = record.id().clone();
        match entry.committed.iter_mut().find(|held| held.id() == &id) {
            Some(held) => *held = record,
            None => entry.committed.push(record),
        }
        debug!(collection = %key, record = %id, "installed confirmed record");
        true
    }

    /// React to a change another actor made to `key`.
    ///
    /// An idle collection is discarded. With a mutation in flight the
    /// materialised state stays visible until the refetch arrives through
    /// [`OptimisticCache::hydrate`]; if the mutation resolves first, its
    /// [`Resolution`] asks for the refetch again.
    pub fn invalidate(&mut self, key: &CollectionKey) -> Invalidation {
        match self.entries.get_mut(key) {
            Some(entry) if entry.pending.is_some() => {
                entry.refetch_on_resolve = true;
                debug!(collection = %key, "invalidated collection with pending mutation");
            }
            _ => {
                self.entries.remove(key);
                debug!(collection = %key, "invalidated collection");
            }
        }
        Invalidation::Refetch(key.clone())
    }

    /// Discard a collection derived from one that just changed.
    ///
    /// While the derived collection has its own mutation in flight, its
    /// state and snapshot are kept and the refetch is queued until that
    /// mutation resolves.
    pub fn invalidate_dependent(&mut self, key: &CollectionKey) -> Invalidation {
        match self.entries.get_mut(key) {
            Some(entry) if entry.pending.is_some() => {
                entry.refetch_on_resolve = true;
                debug!(collection = %key, "queued invalidation behind pending mutation");
                Invalidation::Deferred(key.clone())
            }
            _ => {
                self.entries.remove(key);
                debug!(collection = %key, "invalidated dependent collection");
                Invalidation::Refetch(key.clone())
            }
        }
    }

    fn pending_entry(&mut self, key: &CollectionKey) -> Result<&mut CacheEntry, CacheError> {
        self.entries
            .get_mut(key)
            .filter(|entry| entry.pending.is_some())
            .ok_or_else(|| CacheError::NoPendingMutation { key: key.clone() })
    }

    fn release_queued_refetch(&mut self, key: &CollectionKey) -> Resolution {
        let queued = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.refetch_on_resolve);
        if !queued {
            return Resolution::default();
        }
        self.entries.remove(key);
        debug!(collection = %key, "released queued invalidation");
        Resolution {
            refetch: Some(key.clone()),
        }
    }
}
