//! Synchronisation coordinator.
//!
//! Drives every mutation of one actor session through the same state
//! machine:
//!
//! ```text
//! Idle --check allowed--> apply_optimistic --> Pending --write ok----> Committed
//!   \                                              \--write failed--> RolledBack
//!    \--check denied--> Throttled (cache untouched)
//! ```
//!
//! `Pending` is entered only after a successful `apply_optimistic` and left
//! through exactly one `commit` or `rollback`. The shared cache is never
//! locked across the remote write, so listener handlers can invalidate
//! collections meanwhile and refetches can rebase the pending change.
//!
//! Change events that this session's own writes produce are ignored; only
//! other actors' changes invalidate the cache.

mod request;

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::domain::cache::{CacheError, Invalidation, SharedCache, lock_cache};
use crate::domain::listener::{ChangeEvent, ChangeHandlers, ColumnFilter};
use crate::domain::ports::{AuthoritativeStore, AuthoritativeStoreError};
use crate::domain::rate_limit::{RateLimitDecision, RateLimitError, RateLimiter};
use crate::domain::{ActorId, CollectionKey, Endpoint, Record};

pub use request::{Mutation, MutationRequest, RemoteWriteFailure};

/// Outcome of a mutation that reached a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationStatus {
    /// The write was confirmed and the optimistic state kept.
    Committed(CommittedMutation),
    /// The rate limiter denied the request; the cache was not touched.
    Throttled {
        /// Whole seconds until the caller may retry.
        retry_after_seconds: u64,
    },
}

/// Details of a committed mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommittedMutation {
    /// Record as confirmed by the authoritative store, if it returned one.
    pub record: Option<Record>,
    /// Collections discarded from the cache that must be refetched now.
    pub refetch: Vec<CollectionKey>,
}

/// Failures that abort a mutation.
#[derive(Debug, Error)]
pub enum MutationError {
    /// The rate limiter could not decide (unknown endpoint or store fault).
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    /// The caller broke the apply/commit/rollback protocol.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// The remote write failed and the optimistic change was rolled back.
    #[error("mutation of {key} rolled back: {source}")]
    RemoteWrite {
        /// Collection that was rolled back.
        key: CollectionKey,
        /// Failure reported by the remote write.
        #[source]
        source: RemoteWriteFailure,
        /// Set when the collection went stale during the write and no
        /// refetch replaced it; the collection was discarded and must be
        /// refetched.
        refetch: Option<CollectionKey>,
    },
}

/// Composes the rate limiter, the optimistic cache, and change handlers for
/// one actor session.
pub struct SyncCoordinator {
    actor: ActorId,
    limiter: Arc<RateLimiter>,
    cache: SharedCache,
}

impl SyncCoordinator {
    /// Build a coordinator for `actor` over a session cache.
    pub fn new(actor: ActorId, limiter: Arc<RateLimiter>, cache: SharedCache) -> Self {
        Self {
            actor,
            limiter,
            cache,
        }
    }

    /// Actor this session mutates as.
    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// Session cache handle.
    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Rate-limit, apply optimistically, write remotely, then commit or roll
    /// back.
    ///
    /// On commit the confirmed record (if returned) replaces the optimistic
    /// one and `mutation.dependents` are invalidated. Dependents with their
    /// own pending mutation are invalidated in deferred mode and released
    /// when that mutation resolves.
    ///
    /// # Errors
    ///
    /// - [`MutationError::Cache`] when a mutation is already pending for the
    ///   collection. The request is refused before it counts against the
    ///   rate limit.
    /// - [`MutationError::RateLimit`] when no decision could be made.
    /// - [`MutationError::RemoteWrite`] after a rollback.
    pub async fn mutate<F, Fut>(
        &self,
        endpoint: &Endpoint,
        mutation: Mutation,
        remote_write: F,
    ) -> Result<MutationStatus, MutationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Record>, RemoteWriteFailure>>,
    {
        let Mutation {
            collection_key: key,
            change,
            dependents,
        } = mutation;

        if lock_cache(&self.cache).is_pending(&key) {
            return Err(CacheError::MutationPending { key }.into());
        }

        let decision = self.limiter.check(&self.actor, endpoint).await?;
        if let RateLimitDecision::Denied {
            retry_after_seconds,
        } = decision
        {
            info!(
                actor = %self.actor,
                endpoint = %endpoint,
                collection = %key,
                retry_after_seconds,
                "mutation throttled"
            );
            return Ok(MutationStatus::Throttled {
                retry_after_seconds,
            });
        }

        lock_cache(&self.cache).apply_optimistic(&key, change)?;

        match remote_write().await {
            Ok(record) => {
                let refetch = self.commit(&key, record.as_ref(), &dependents)?;
                debug!(collection = %key, refetch = refetch.len(), "mutation committed");
                Ok(MutationStatus::Committed(CommittedMutation { record, refetch }))
            }
            Err(failure) => {
                let resolution = lock_cache(&self.cache).rollback(&key)?;
                warn!(
                    actor = %self.actor,
                    collection = %key,
                    error = %failure,
                    "remote write failed; optimistic change rolled back"
                );
                Err(MutationError::RemoteWrite {
                    key,
                    source: failure,
                    refetch: resolution.refetch,
                })
            }
        }
    }

    fn commit(
        &self,
        key: &CollectionKey,
        confirmed: Option<&Record>,
        dependents: &[CollectionKey],
    ) -> Result<Vec<CollectionKey>, CacheError> {
        let mut cache = lock_cache(&self.cache);
        let resolution = cache.commit(key)?;
        let mut refetch = Vec::with_capacity(dependents.len() + 1);
        match (resolution.refetch, confirmed) {
            (Some(released), _) => refetch.push(released),
            (None, Some(record)) => {
                cache.replace_committed(key, record.clone());
            }
            (None, None) => {}
        }
        for dependent in dependents {
            match cache.invalidate_dependent(dependent) {
                Invalidation::Refetch(ready) => refetch.push(ready),
                Invalidation::Deferred(queued) => {
                    debug!(collection = %queued, "dependent refetch deferred");
                }
            }
        }
        Ok(refetch)
    }

    /// Send `request` to `store` through [`SyncCoordinator::mutate`].
    ///
    /// # Errors
    ///
    /// See [`SyncCoordinator::mutate`].
    pub async fn mutate_record(
        &self,
        store: &dyn AuthoritativeStore,
        endpoint: &Endpoint,
        request: MutationRequest,
    ) -> Result<MutationStatus, MutationError> {
        let target_id = request.target_id.clone();
        let changes = request.changes.clone();
        let actor = &self.actor;
        self.mutate(endpoint, Mutation::from(request), || async move {
            store
                .write(actor, &target_id, &changes)
                .await
                .map(Some)
                .map_err(RemoteWriteFailure::from)
        })
        .await
    }

    /// Read `key` from `store` and install it in the cache. Returns how many
    /// records were loaded.
    ///
    /// A pending mutation on `key` is re-applied on top of the fetched
    /// records.
    ///
    /// # Errors
    ///
    /// Returns the store error when the read fails; the cache is untouched.
    pub async fn refetch(
        &self,
        store: &dyn AuthoritativeStore,
        key: &CollectionKey,
        filter: Option<ColumnFilter>,
    ) -> Result<usize, AuthoritativeStoreError> {
        let records = store.read(key, filter).await?;
        let count = records.len();
        lock_cache(&self.cache).hydrate(key, records);
        Ok(count)
    }

    /// Invalidate `key` in response to a change made by another actor.
    ///
    /// Returns `None` for the echo of this session's own write.
    pub fn on_change(&self, event: &ChangeEvent, key: &CollectionKey) -> Option<Invalidation> {
        invalidate_on_change(&self.cache, &self.actor, event, key)
    }

    /// Catch-all listener handlers that invalidate `key` on every change made
    /// by another actor and send the refetch request to `refetch`.
    pub fn invalidation_handlers(
        &self,
        key: CollectionKey,
        refetch: UnboundedSender<CollectionKey>,
    ) -> ChangeHandlers {
        let cache = Arc::clone(&self.cache);
        let actor = self.actor.clone();
        ChangeHandlers::catch_all(move |event| {
            let Some(invalidation) = invalidate_on_change(&cache, &actor, event, &key) else {
                return;
            };
            if let Some(ready) = invalidation.refetch_now()
                && refetch.send(ready.clone()).is_err()
            {
                debug!(collection = %ready, "refetch receiver dropped");
            }
        })
    }
}

fn invalidate_on_change(
    cache: &SharedCache,
    actor: &ActorId,
    event: &ChangeEvent,
    key: &CollectionKey,
) -> Option<Invalidation> {
    if event.originated_by(actor) {
        debug!(collection = %key, record = %event.record_id(), "ignored own change");
        return None;
    }
    let invalidation = lock_cache(cache).invalidate(key);
    debug!(
        collection = %key,
        kind = %event.kind(),
        record = %event.record_id(),
        "remote change invalidated collection"
    );
    Some(invalidation)
}
