//! Port for the authoritative record store the cache mirrors.

use async_trait::async_trait;

use crate::domain::listener::ColumnFilter;
use crate::domain::{ActorId, CollectionKey, FieldChanges, Record, RecordId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by authoritative store adapters.
    pub enum AuthoritativeStoreError {
        /// The target record does not exist.
        NotFound { id: String } => "record {id} does not exist",
        /// The store refused the write (validation, permissions, conflict).
        Rejected { message: String } => "write rejected: {message}",
        /// The store could not be reached.
        Connection { message: String } => "authoritative store unavailable: {message}",
    }
}

/// Remote source of truth for records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthoritativeStore: Send + Sync {
    /// Read the records making up `key`, optionally narrowed by `filter`.
    async fn read(
        &self,
        key: &CollectionKey,
        filter: Option<ColumnFilter>,
    ) -> Result<Vec<Record>, AuthoritativeStoreError>;

    /// Merge `changes` into the record `target_id` on behalf of `actor` and
    /// return the stored result. Change events for the write name `actor`
    /// as their origin.
    async fn write(
        &self,
        actor: &ActorId,
        target_id: &RecordId,
        changes: &FieldChanges,
    ) -> Result<Record, AuthoritativeStoreError>;
}
