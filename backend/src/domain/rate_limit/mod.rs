//! Sliding-window rate limiter.
//!
//! Bounds how many mutating requests one actor may issue against one
//! endpoint within a window that starts at the actor's first request. The
//! read-check-increment step runs inside the [`RateLimitStore`] so that
//! concurrent checks for the same pair can never admit more than the quota.

mod quota;
mod window;

use std::sync::Arc;

use mockable::Clock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::ports::{RateLimitStore, RateLimitStoreError};
use crate::domain::{ActorId, Endpoint};

pub use quota::{Quota, QuotaError, QuotaPolicy};
pub use window::{RateLimitWindow, WindowAdmission};

/// Result of a rate-limit check. A denial is ordinary control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The request was counted.
    Allowed {
        /// Requests left in the current window.
        remaining: u32,
    },
    /// The window is exhausted.
    Denied {
        /// Whole seconds until the window expires, at least one.
        retry_after_seconds: u64,
    },
}

impl RateLimitDecision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Failures that prevent a decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// The endpoint has no configured quota.
    #[error("endpoint '{endpoint}' has no configured quota")]
    UnknownEndpoint {
        /// Rejected endpoint.
        endpoint: Endpoint,
    },
    /// The window store failed; the request must not proceed.
    #[error(transparent)]
    Store(#[from] RateLimitStoreError),
}

/// Per-`(actor, endpoint)` sliding-window limiter.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: Arc<QuotaPolicy>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Build a limiter over `store` using quotas from `policy`.
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        policy: Arc<QuotaPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    /// Quota table in use.
    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Check and count one request using the configured quota.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::UnknownEndpoint`] for endpoints missing from
    /// the policy and [`RateLimitError::Store`] when the store fails.
    pub async fn check(
        &self,
        actor: &ActorId,
        endpoint: &Endpoint,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let quota = self
            .policy
            .quota_for(endpoint)
            .ok_or_else(|| RateLimitError::UnknownEndpoint {
                endpoint: endpoint.clone(),
            })?;
        self.check_with_quota(actor, endpoint, quota).await
    }

    /// Check and count one request against an explicit quota.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Store`] when the store fails.
    pub async fn check_with_quota(
        &self,
        actor: &ActorId,
        endpoint: &Endpoint,
        quota: Quota,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let now = self.clock.utc();
        let admission = self
            .store
            .acquire(actor, endpoint, &quota, now)
            .await
            .inspect_err(|err| {
                warn!(actor = %actor, endpoint = %endpoint, error = %err, "rate limit store failed");
            })?;

        let decision = match &admission {
            WindowAdmission::Opened(window) | WindowAdmission::Counted(window) => {
                RateLimitDecision::Allowed {
                    remaining: window.remaining(&quota),
                }
            }
            WindowAdmission::Exhausted(window) => RateLimitDecision::Denied {
                retry_after_seconds: window.retry_after_seconds(&quota, now),
            },
        };

        match decision {
            RateLimitDecision::Allowed { remaining } => debug!(
                actor = %actor,
                endpoint = %endpoint,
                count = admission.window().request_count,
                remaining,
                "rate limit check allowed"
            ),
            RateLimitDecision::Denied {
                retry_after_seconds,
            } => warn!(
                actor = %actor,
                endpoint = %endpoint,
                max_requests = quota.max_requests(),
                retry_after_seconds,
                "rate limit exceeded"
            ),
        }
        Ok(decision)
    }

    /// Remove windows older than the longest configured window.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Store`] when the store fails.
    pub async fn purge_expired(&self) -> Result<u64, RateLimitError> {
        let Some(longest) = self.policy.longest_window() else {
            return Ok(0);
        };
        let cutoff = self.clock.utc() - longest;
        let removed = self.store.purge_expired(cutoff).await?;
        debug!(removed, cutoff = %cutoff, "purged expired rate limit windows");
        Ok(removed)
    }
}
