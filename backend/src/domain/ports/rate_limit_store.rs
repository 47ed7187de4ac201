//! Port abstraction for rate-limit window persistence.
//!
//! The [`RateLimitStore`] contract folds the whole sliding-window
//! read-check-increment into a single call so adapters can make it atomic
//! with whatever primitive their backend offers (a mutex, a row lock, a
//! conditional upsert). Splitting it into a read followed by a write would
//! let two concurrent requests both observe spare capacity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::rate_limit::{Quota, RateLimitWindow, WindowAdmission};
use crate::domain::{ActorId, Endpoint};

use super::define_port_error;

define_port_error! {
    /// Errors raised by rate-limit store adapters.
    pub enum RateLimitStoreError {
        /// Store connection could not be established.
        Connection { message: String } => "rate limit store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "rate limit store query failed: {message}",
        /// Stored data could not be mapped back into a window.
        Corrupt { message: String } => "rate limit store returned invalid data: {message}",
    }
}

/// Port for atomic sliding-window admission.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Admit or reject one request for `(actor, endpoint)` at `now`.
    ///
    /// Must behave as one atomic step per pair:
    /// - no current window: open one at `now` with a count of one;
    /// - current window below `quota.max_requests()`: increment it;
    /// - otherwise: leave it untouched and report it as exhausted.
    async fn acquire(
        &self,
        actor: &ActorId,
        endpoint: &Endpoint,
        quota: &Quota,
        now: DateTime<Utc>,
    ) -> Result<WindowAdmission, RateLimitStoreError>;

    /// Remove windows that started at or before `cutoff`.
    ///
    /// Returns the number of windows removed.
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, RateLimitStoreError>;
}

/// Store that admits every request in a fresh window and keeps nothing.
///
/// Use it where throttling is not under test.
#[derive(Debug, Default)]
pub struct FixtureRateLimitStore;

#[async_trait]
impl RateLimitStore for FixtureRateLimitStore {
    async fn acquire(
        &self,
        actor: &ActorId,
        endpoint: &Endpoint,
        _quota: &Quota,
        now: DateTime<Utc>,
    ) -> Result<WindowAdmission, RateLimitStoreError> {
        Ok(WindowAdmission::Opened(RateLimitWindow::open(
            actor.clone(),
            endpoint.clone(),
            now,
        )))
    }

    async fn purge_expired(&self, _cutoff: DateTime<Utc>) -> Result<u64, RateLimitStoreError> {
        Ok(0)
    }
}
