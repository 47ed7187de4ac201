//! Quota table mapping endpoint names to sliding-window limits.

use std::collections::{BTreeMap, HashMap};

use chrono::TimeDelta;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{ActorValidationError, Endpoint};

/// Errors raised while building a quota table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    /// A quota allowed zero requests.
    #[error("quota for '{endpoint}' must allow at least one request")]
    ZeroRequests {
        /// Offending endpoint.
        endpoint: String,
    },
    /// A quota had a zero-length window.
    #[error("quota for '{endpoint}' must span at least one minute")]
    ZeroWindow {
        /// Offending endpoint.
        endpoint: String,
    },
    /// An endpoint name failed validation.
    #[error(transparent)]
    Endpoint(#[from] ActorValidationError),
    /// The document was not valid JSON of the expected shape.
    #[error("quota table is malformed: {message}")]
    Malformed {
        /// Parser message.
        message: String,
    },
}

/// Request limit over a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quota {
    max_requests: u32,
    window_minutes: u32,
}

impl Quota {
    /// Build a quota allowing `max_requests` per `window_minutes`.
    ///
    /// # Examples
    /// ```
    /// use gradesync::domain::rate_limit::Quota;
    ///
    /// let quota = Quota::new(10, 60).expect("valid quota");
    /// assert_eq!(quota.window().num_seconds(), 3_600);
    /// assert!(Quota::new(0, 60).is_err());
    /// ```
    pub fn new(max_requests: u32, window_minutes: u32) -> Result<Self, QuotaError> {
        Self::for_endpoint("<inline>", max_requests, window_minutes)
    }

    fn for_endpoint(
        endpoint: &str,
        max_requests: u32,
        window_minutes: u32,
    ) -> Result<Self, QuotaError> {
        if max_requests == 0 {
            return Err(QuotaError::ZeroRequests {
                endpoint: endpoint.to_owned(),
            });
        }
        if window_minutes == 0 {
            return Err(QuotaError::ZeroWindow {
                endpoint: endpoint.to_owned(),
            });
        }
        Ok(Self {
            max_requests,
            window_minutes,
        })
    }

    /// Requests allowed per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Window length in minutes.
    pub fn window_minutes(&self) -> u32 {
        self.window_minutes
    }

    /// Window length.
    pub fn window(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.window_minutes))
    }
}

const BUILTIN_QUOTAS: [(&str, u32, u32); 4] = [
    ("grades", 60, 1),
    ("bulk-grades", 10, 60),
    ("attendance", 120, 1),
    ("report-export", 5, 10),
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct QuotaEntry {
    max_requests: u32,
    window_minutes: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QuotaDocument {
    endpoints: HashMap<String, QuotaEntry>,
}

/// Immutable endpoint-to-quota table, loaded once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPolicy {
    quotas: BTreeMap<Endpoint, Quota>,
}

impl QuotaPolicy {
    /// Build a policy from validated entries.
    pub fn new(quotas: impl IntoIterator<Item = (Endpoint, Quota)>) -> Self {
        Self {
            quotas: quotas.into_iter().collect(),
        }
    }

    /// Default table for the grading endpoints.
    pub fn builtin() -> Self {
        let quotas = BUILTIN_QUOTAS
            .iter()
            .filter_map(|&(name, max_requests, window_minutes)| {
                let endpoint = Endpoint::new(name).ok()?;
                let quota = Quota::for_endpoint(name, max_requests, window_minutes).ok()?;
                Some((endpoint, quota))
            });
        Self::new(quotas)
    }

    /// Parse a JSON document of the form
    /// `{"endpoints": {"<name>": {"maxRequests": n, "windowMinutes": m}}}`.
    ///
    /// # Examples
    /// ```
    /// use gradesync::domain::Endpoint;
    /// use gradesync::domain::rate_limit::QuotaPolicy;
    ///
    /// let policy = QuotaPolicy::from_json(
    ///     r#"{"endpoints": {"bulk-grades": {"maxRequests": 10, "windowMinutes": 60}}}"#,
    /// )
    /// .expect("valid table");
    /// let quota = policy
    ///     .quota_for(&Endpoint::new("bulk-grades").expect("endpoint"))
    ///     .expect("configured");
    /// assert_eq!(quota.max_requests(), 10);
    /// ```
    pub fn from_json(raw: &str) -> Result<Self, QuotaError> {
        let document: QuotaDocument =
            serde_json::from_str(raw).map_err(|err| QuotaError::Malformed {
                message: err.to_string(),
            })?;
        let mut quotas = BTreeMap::new();
        for (name, entry) in document.endpoints {
            let quota = Quota::for_endpoint(&name, entry.max_requests, entry.window_minutes)?;
            quotas.insert(Endpoint::new(name)?, quota);
        }
        Ok(Self { quotas })
    }

    /// Quota configured for `endpoint`, if any.
    pub fn quota_for(&self, endpoint: &Endpoint) -> Option<Quota> {
        self.quotas.get(endpoint).copied()
    }

    /// Longest configured window; older rate-limit windows are expired for
    /// every endpoint.
    pub fn longest_window(&self) -> Option<TimeDelta> {
        self.quotas.values().map(Quota::window).max()
    }

    /// Configured endpoints in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&Endpoint, &Quota)> {
        self.quotas.iter()
    }

    /// Number of configured endpoints.
    pub fn len(&self) -> usize {
        self.quotas.len()
    }

    /// Whether no endpoint is configured.
    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::builtin()
    }
}
