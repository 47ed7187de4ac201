//! Actor and endpoint identifiers used for rate limiting.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for [`ActorId`] and [`Endpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActorValidationError {
    /// Actor identifier was empty.
    #[error("actor id must not be empty")]
    EmptyActorId,
    /// Actor identifier was not a UUID.
    #[error("actor id must be a valid UUID")]
    InvalidActorId,
    /// Endpoint name was empty.
    #[error("endpoint must not be empty")]
    EmptyEndpoint,
    /// Endpoint name contained characters outside `[a-z0-9_-]`.
    #[error("endpoint '{name}' may only contain lowercase letters, digits, '-' and '_'")]
    InvalidEndpoint {
        /// The rejected endpoint name.
        name: String,
    },
}

/// Authenticated end-user session issuing mutations.
///
/// Keeps the caller's original string form alongside the parsed UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorId(Uuid, String);

impl ActorId {
    /// Validate and construct an [`ActorId`] from borrowed input.
    pub fn new(id: impl AsRef<str>) -> Result<Self, ActorValidationError> {
        Self::from_owned(id.as_ref().to_owned())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid, uuid.to_string())
    }

    /// Generate a new random [`ActorId`].
    pub fn random() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    fn from_owned(id: String) -> Result<Self, ActorValidationError> {
        if id.is_empty() {
            return Err(ActorValidationError::EmptyActorId);
        }
        if id.trim() != id {
            return Err(ActorValidationError::InvalidActorId);
        }
        let parsed = Uuid::parse_str(&id).map_err(|_| ActorValidationError::InvalidActorId)?;
        Ok(Self(parsed, id))
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl AsRef<str> for ActorId {
    fn as_ref(&self) -> &str {
        self.1.as_str()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl From<ActorId> for String {
    fn from(value: ActorId) -> Self {
        let ActorId(_, raw) = value;
        raw
    }
}

impl TryFrom<String> for ActorId {
    type Error = ActorValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_owned(value)
    }
}

/// Name of a mutating endpoint governed by a quota, e.g. `bulk-grades`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint(String);

impl Endpoint {
    /// Validate and construct an endpoint name.
    ///
    /// # Examples
    /// ```
    /// use gradesync::domain::Endpoint;
    ///
    /// assert!(Endpoint::new("bulk-grades").is_ok());
    /// assert!(Endpoint::new("Bulk Grades").is_err());
    /// ```
    pub fn new(value: impl Into<String>) -> Result<Self, ActorValidationError> {
        let raw = value.into();
        if raw.is_empty() {
            return Err(ActorValidationError::EmptyEndpoint);
        }
        let valid = raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid {
            return Err(ActorValidationError::InvalidEndpoint { name: raw });
        }
        Ok(Self(raw))
    }

    /// Borrow the endpoint name.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ActorValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.0
    }
}
