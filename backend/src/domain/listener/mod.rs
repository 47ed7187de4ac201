//! Change-notification listener.
//!
//! Keeps at most one live channel per [`CollectionKey`], drains it in
//! emission order on a dedicated Tokio task, and hands every event that
//! passes the subscription's [`ChangeFilter`] to its [`ChangeHandlers`].
//! A lost channel is logged and marked inactive; reconnecting is left to
//! the caller.

mod event;
mod handlers;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::CollectionKey;
use crate::domain::ports::{ChangeEventSource, ChangeEventSourceError, ChangeStream};

pub use event::{ChangeEvent, ChangeFilter, ChangeKind, ChangePayload, ColumnFilter, KindFilter};
pub use handlers::{ChangeHandler, ChangeHandlers, ChangeHandlersBuilder};

/// Errors raised while subscribing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    /// The change source refused or failed the handshake.
    #[error("failed to subscribe {key}: {source}")]
    Subscribe {
        /// Collection being subscribed.
        key: CollectionKey,
        /// Underlying source failure.
        source: ChangeEventSourceError,
    },
}

/// Token identifying one subscription generation for a collection.
///
/// Only the handle of the live generation can tear the channel down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    key: CollectionKey,
    generation: u64,
}

impl SubscriptionHandle {
    /// Collection this handle belongs to.
    pub fn key(&self) -> &CollectionKey {
        &self.key
    }
}

struct LiveSubscription {
    generation: u64,
    filter: ChangeFilter,
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl LiveSubscription {
    fn teardown(self, key: &CollectionKey) {
        self.active.store(false, Ordering::Release);
        self.task.abort();
        info!(
            collection = %key,
            generation = self.generation,
            filter = %self.filter,
            "change subscription torn down"
        );
    }
}

/// Subscription manager for one consumer session.
pub struct ChangeListener {
    source: Arc<dyn ChangeEventSource>,
    subscriptions: Mutex<HashMap<CollectionKey, LiveSubscription>>,
    next_generation: AtomicU64,
}

impl ChangeListener {
    /// Build a listener reading from `source`.
    pub fn new(source: Arc<dyn ChangeEventSource>) -> Self {
        Self {
            source,
            subscriptions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Open a channel for `key` and start dispatching to `handlers`.
    ///
    /// Any previous subscription for `key` is torn down before the new
    /// handshake starts. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Subscribe`] when the source refuses the
    /// channel. The previous subscription stays torn down in that case.
    pub async fn subscribe(
        &self,
        key: CollectionKey,
        filter: ChangeFilter,
        handlers: ChangeHandlers,
    ) -> Result<SubscriptionHandle, ListenerError> {
        if let Some(previous) = self.lock_subscriptions().remove(&key) {
            previous.teardown(&key);
        }

        let stream = self
            .source
            .open(&filter)
            .await
            .map_err(|source| ListenerError::Subscribe {
                key: key.clone(),
                source,
            })?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(pump(
            key.clone(),
            filter.clone(),
            handlers,
            stream,
            Arc::clone(&active),
        ));
        info!(collection = %key, generation, filter = %filter, "change subscription established");

        let live = LiveSubscription {
            generation,
            filter,
            active,
            task,
        };
        // A concurrent subscribe for the same key may have finished first.
        if let Some(replaced) = self.lock_subscriptions().insert(key.clone(), live) {
            replaced.teardown(&key);
        }
        Ok(SubscriptionHandle { key, generation })
    }

    /// Stop delivering events for `handle`. Calling it again, or after the
    /// key was re-subscribed, does nothing.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut subscriptions = self.lock_subscriptions();
        let is_live = subscriptions
            .get(&handle.key)
            .is_some_and(|live| live.generation == handle.generation);
        if !is_live {
            debug!(collection = %handle.key, generation = handle.generation, "stale unsubscribe ignored");
            return;
        }
        if let Some(live) = subscriptions.remove(&handle.key) {
            live.teardown(&handle.key);
        }
    }

    /// Whether `key` has a subscription whose channel is still open.
    pub fn is_active(&self, key: &CollectionKey) -> bool {
        self.lock_subscriptions()
            .get(key)
            .is_some_and(|live| live.active.load(Ordering::Acquire))
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, HashMap<CollectionKey, LiveSubscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(
            self.subscriptions
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (key, live) in subscriptions {
            live.teardown(&key);
        }
    }
}

async fn pump(
    key: CollectionKey,
    filter: ChangeFilter,
    handlers: ChangeHandlers,
    mut stream: ChangeStream,
    active: Arc<AtomicBool>,
) {
    while let Some(event) = stream.next().await {
        if !active.load(Ordering::Acquire) {
            return;
        }
        if !filter.matches(&event) {
            continue;
        }
        let handled = handlers.dispatch(&event);
        debug!(
            collection = %key,
            kind = %event.kind(),
            record = %event.record_id(),
            handled,
            "delivered change event"
        );
    }
    if active.swap(false, Ordering::AcqRel) {
        warn!(collection = %key, filter = %filter, "change channel closed; subscription lost");
    }
}

#[cfg(test)]
mod tests;
