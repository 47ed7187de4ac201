//! Records and collection keys materialised by the optimistic cache.
//!
//! A [`Record`] is the unit the authoritative store persists: an immutable
//! [`RecordId`], a monotonically increasing version, and arbitrary JSON
//! fields. A [`CollectionKey`] names a logical group of records (for example
//! the grades of one class in one semester).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Validation errors returned when constructing identifiers and keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyValidationError {
    /// Input is empty after trimming whitespace.
    #[error("{kind} must not be empty")]
    Empty {
        /// Which identifier was being validated.
        kind: &'static str,
    },
    /// Input contains whitespace.
    #[error("{kind} must not contain whitespace")]
    ContainsWhitespace {
        /// Which identifier was being validated.
        kind: &'static str,
    },
}

fn validate_key(raw: &str, kind: &'static str) -> Result<(), KeyValidationError> {
    if raw.trim().is_empty() {
        return Err(KeyValidationError::Empty { kind });
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(KeyValidationError::ContainsWhitespace { kind });
    }
    Ok(())
}

/// Stable identifier of a record. Never changes once the record exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Validate and construct a record identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, KeyValidationError> {
        let raw = value.into();
        validate_key(&raw, "record id")?;
        Ok(Self(raw))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for RecordId {
    type Error = KeyValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecordId> for String {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

/// Identifier of a logical group of records held by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionKey(String);

impl CollectionKey {
    /// Validate and construct a collection key.
    pub fn new(value: impl Into<String>) -> Result<Self, KeyValidationError> {
        let raw = value.into();
        validate_key(&raw, "collection key")?;
        Ok(Self(raw))
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for CollectionKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<String> for CollectionKey {
    type Error = KeyValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CollectionKey> for String {
    fn from(value: CollectionKey) -> Self {
        value.0
    }
}

/// Changed fields of a record, keyed by field name.
pub type FieldChanges = Map<String, Value>;

/// A uniquely identified domain entity with versioned fields.
///
/// ## Invariants
/// - `id` is fixed at construction; [`Record::apply_changes`] never touches it.
/// - `version` increases by one for every applied change set.
///
/// # Examples
/// ```
/// use gradesync::domain::{Record, RecordId};
/// use serde_json::json;
///
/// let id = RecordId::new("g1").expect("valid id");
/// let record = Record::new(id, json!({"grade": 15}).as_object().cloned().unwrap_or_default());
/// let changes = json!({"grade": 17}).as_object().cloned().unwrap_or_default();
/// let updated = record.apply_changes(&changes);
/// assert_eq!(updated.field("grade"), Some(&json!(17)));
/// assert_eq!(updated.version(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    version: u64,
    fields: Map<String, Value>,
}

impl Record {
    /// Create a record at version 1.
    pub fn new(id: RecordId, fields: Map<String, Value>) -> Self {
        Self::with_version(id, 1, fields)
    }

    /// Create a record with an explicit version, as read from storage.
    pub fn with_version(id: RecordId, version: u64, fields: Map<String, Value>) -> Self {
        Self {
            id,
            version,
            fields,
        }
    }

    /// Record identifier.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Look up a single field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Merge `changes` into a copy of this record and bump the version.
    ///
    /// An `id` entry inside `changes` is ignored.
    #[must_use]
    pub fn apply_changes(&self, changes: &FieldChanges) -> Self {
        let mut fields = self.fields.clone();
        for (name, value) in changes {
            if name == "id" {
                continue;
            }
            fields.insert(name.clone(), value.clone());
        }
        Self {
            id: self.id.clone(),
            version: self.version.saturating_add(1),
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    //! Validates identifier parsing and record merging.
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object literal")
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn record_id_rejects_blank(#[case] value: &str) {
        let err = RecordId::new(value).expect_err("blank id rejected");
        assert_eq!(err, KeyValidationError::Empty { kind: "record id" });
    }

    #[rstest]
    #[case("grades:class 7b")]
    #[case(" grades")]
    fn collection_key_rejects_whitespace(#[case] value: &str) {
        let err = CollectionKey::new(value).expect_err("whitespace rejected");
        assert_eq!(
            err,
            KeyValidationError::ContainsWhitespace {
                kind: "collection key"
            }
        );
    }

    #[rstest]
    fn collection_key_accepts_clean_input() {
        let key = CollectionKey::new("grades:class-7b:2026-s1").expect("valid key");
        assert_eq!(key.as_str(), "grades:class-7b:2026-s1");
        assert_eq!(key.to_string(), "grades:class-7b:2026-s1");
    }

    #[rstest]
    fn apply_changes_never_rewrites_id() {
        let record = Record::new(RecordId::new("g1").expect("id"), fields(json!({"grade": 15})));
        let updated = record.apply_changes(&fields(json!({"id": "other", "grade": 16})));

        assert_eq!(updated.id().as_str(), "g1");
        assert_eq!(updated.field("grade"), Some(&json!(16)));
        assert!(updated.field("id").is_none());
    }

    #[rstest]
    fn apply_changes_leaves_original_untouched() {
        let record = Record::new(RecordId::new("g1").expect("id"), fields(json!({"grade": 15})));
        let _updated = record.apply_changes(&fields(json!({"grade": 17})));

        assert_eq!(record.field("grade"), Some(&json!(15)));
        assert_eq!(record.version(), 1);
    }

    #[rstest]
    fn record_id_deserialisation_validates() {
        let parsed: Result<RecordId, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
    }
}
