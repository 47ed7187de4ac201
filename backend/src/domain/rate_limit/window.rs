//! Sliding-window counters and the admission rule applied to them.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::Quota;
use crate::domain::{ActorId, Endpoint};

/// Request counter for one `(actor, endpoint)` pair.
///
/// The window starts at the first request and lasts for the quota's window
/// length. A later request after expiry opens a fresh window that replaces
/// this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    /// Actor being throttled.
    pub actor: ActorId,
    /// Endpoint being throttled.
    pub endpoint: Endpoint,
    /// First request of the window.
    pub window_start: DateTime<Utc>,
    /// Requests admitted in the window so far.
    pub request_count: u32,
}

impl RateLimitWindow {
    /// Open a window at `now` holding its first request.
    pub fn open(actor: ActorId, endpoint: Endpoint, now: DateTime<Utc>) -> Self {
        Self {
            actor,
            endpoint,
            window_start: now,
            request_count: 1,
        }
    }

    /// Whether the window still covers `now`. The lower bound is strict.
    pub fn is_current(&self, quota: &Quota, now: DateTime<Utc>) -> bool {
        self.window_start > now - quota.window()
    }

    /// Instant the window stops counting.
    pub fn expires_at(&self, quota: &Quota) -> DateTime<Utc> {
        self.window_start + quota.window()
    }

    /// Requests still available in the window.
    pub fn remaining(&self, quota: &Quota) -> u32 {
        quota.max_requests().saturating_sub(self.request_count)
    }

    /// Whole seconds until the window expires, rounded up and never below
    /// one.
    ///
    /// # Examples
    /// ```
    /// use chrono::{TimeDelta, TimeZone, Utc};
    /// use gradesync::domain::rate_limit::{Quota, RateLimitWindow};
    /// use gradesync::domain::{ActorId, Endpoint};
    ///
    /// let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("time");
    /// let window = RateLimitWindow::open(
    ///     ActorId::random(),
    ///     Endpoint::new("bulk-grades").expect("endpoint"),
    ///     start,
    /// );
    /// let quota = Quota::new(10, 60).expect("quota");
    /// let now = start + TimeDelta::minutes(45) + TimeDelta::milliseconds(500);
    /// assert_eq!(window.retry_after_seconds(&quota, now), 900);
    /// ```
    pub fn retry_after_seconds(&self, quota: &Quota, now: DateTime<Utc>) -> u64 {
        let remaining = self.expires_at(quota) - now;
        ceil_seconds(remaining).max(1)
    }

    /// Apply the sliding-window rule to the stored window for a pair.
    ///
    /// Stores call this while holding whatever lock makes the
    /// read-check-increment atomic for the pair.
    pub fn admit(
        existing: Option<&Self>,
        actor: &ActorId,
        endpoint: &Endpoint,
        quota: &Quota,
        now: DateTime<Utc>,
    ) -> WindowAdmission {
        match existing {
            Some(window) if window.is_current(quota, now) => {
                if window.request_count < quota.max_requests() {
                    let mut counted = window.clone();
                    counted.request_count += 1;
                    WindowAdmission::Counted(counted)
                } else {
                    WindowAdmission::Exhausted(window.clone())
                }
            }
            _ => WindowAdmission::Opened(Self::open(actor.clone(), endpoint.clone(), now)),
        }
    }
}

fn ceil_seconds(delta: TimeDelta) -> u64 {
    u64::try_from(delta.num_milliseconds())
        .map(|millis| millis.div_ceil(1_000))
        .unwrap_or(0)
}

/// Outcome of one atomic window acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowAdmission {
    /// No current window existed; a new one was opened with this request.
    Opened(RateLimitWindow),
    /// The current window had capacity; this request was counted.
    Counted(RateLimitWindow),
    /// The current window is full; nothing was changed.
    Exhausted(RateLimitWindow),
}

impl WindowAdmission {
    /// Window state after the acquisition.
    pub fn window(&self) -> &RateLimitWindow {
        match self {
            Self::Opened(window) | Self::Counted(window) | Self::Exhausted(window) => window,
        }
    }

    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Exhausted(_))
    }
}
