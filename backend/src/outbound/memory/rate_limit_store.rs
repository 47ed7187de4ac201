//! Mutex-guarded `RateLimitStore` for single-process deployments.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::ports::{RateLimitStore, RateLimitStoreError};
use crate::domain::rate_limit::{Quota, RateLimitWindow, WindowAdmission};
use crate::domain::{ActorId, Endpoint};

type WindowKey = (ActorId, Endpoint);

/// Keeps one window per `(actor, endpoint)` in memory.
///
/// The map lock is held for the whole admission, which makes the
/// read-check-increment atomic across tasks and threads.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<WindowKey, RateLimitWindow>>,
}

impl InMemoryRateLimitStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored window for a pair, if any.
    pub fn window(&self, actor: &ActorId, endpoint: &Endpoint) -> Option<RateLimitWindow> {
        self.lock_windows()
            .get(&(actor.clone(), endpoint.clone()))
            .cloned()
    }

    fn lock_windows(&self) -> MutexGuard<'_, HashMap<WindowKey, RateLimitWindow>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn acquire(
        &self,
        actor: &ActorId,
        endpoint: &Endpoint,
        quota: &Quota,
        now: DateTime<Utc>,
    ) -> Result<WindowAdmission, RateLimitStoreError> {
        let mut windows = self.lock_windows();
        let key = (actor.clone(), endpoint.clone());
        let admission = RateLimitWindow::admit(windows.get(&key), actor, endpoint, quota, now);
        if admission.is_admitted() {
            windows.insert(key, admission.window().clone());
        }
        Ok(admission)
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, RateLimitStoreError> {
        let mut windows = self.lock_windows();
        let before = windows.len();
        windows.retain(|_, window| window.window_start > cutoff);
        let removed = before - windows.len();
        debug!(removed, cutoff = %cutoff, "purged in-memory rate limit windows");
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }
}
