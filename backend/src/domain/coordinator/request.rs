//! Mutation descriptions accepted by the coordinator.

use thiserror::Error;

use crate::domain::cache::OptimisticChange;
use crate::domain::ports::AuthoritativeStoreError;
use crate::domain::{CollectionKey, FieldChanges, RecordId};

/// Field-level update of one record, as sent by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    /// Record to update.
    pub target_id: RecordId,
    /// Fields to merge into the record.
    pub changes: FieldChanges,
    /// Cached collection the record belongs to.
    pub collection_key: CollectionKey,
}

impl MutationRequest {
    /// Describe an update of `target_id` within `collection_key`.
    pub fn new(target_id: RecordId, changes: FieldChanges, collection_key: CollectionKey) -> Self {
        Self {
            target_id,
            changes,
            collection_key,
        }
    }
}

/// A change to apply optimistically to one collection, plus the
/// collections to invalidate once it commits.
pub struct Mutation {
    /// Collection the change applies to.
    pub collection_key: CollectionKey,
    /// Change to apply before the remote write.
    pub change: OptimisticChange,
    /// Collections derived from the mutated records.
    pub dependents: Vec<CollectionKey>,
}

impl Mutation {
    /// Mutation of `collection_key` with no dependents.
    pub fn new(collection_key: CollectionKey, change: OptimisticChange) -> Self {
        Self {
            collection_key,
            change,
            dependents: Vec::new(),
        }
    }

    /// Invalidate `keys` after commit.
    #[must_use]
    pub fn with_dependents(mut self, keys: impl IntoIterator<Item = CollectionKey>) -> Self {
        self.dependents.extend(keys);
        self
    }
}

impl From<MutationRequest> for Mutation {
    fn from(request: MutationRequest) -> Self {
        Self::new(
            request.collection_key,
            OptimisticChange::patch(request.target_id, request.changes),
        )
    }
}

/// Failure reported by a remote write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("remote write failed: {message}")]
pub struct RemoteWriteFailure {
    message: String,
}

impl RemoteWriteFailure {
    /// Wrap a failure description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Failure description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<AuthoritativeStoreError> for RemoteWriteFailure {
    fn from(error: AuthoritativeStoreError) -> Self {
        Self::new(error.to_string())
    }
}
