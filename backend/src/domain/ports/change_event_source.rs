//! Port abstraction for the external push channel delivering change events.
//!
//! Adapters translate a transport-specific feed (database replication,
//! websocket broadcast, in-process channel) into a stream of
//! [`ChangeEvent`]s. The stream ends when the underlying channel is lost;
//! sources never replay events emitted before [`ChangeEventSource::open`]
//! returned.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::domain::listener::{ChangeEvent, ChangeFilter};

use super::define_port_error;

define_port_error! {
    /// Errors raised while establishing a change channel.
    pub enum ChangeEventSourceError {
        /// The source could not be reached.
        Connection { message: String } => "change source connection failed: {message}",
        /// The source refused the requested filter.
        Rejected { message: String } => "change source rejected subscription: {message}",
    }
}

/// Ordered stream of change events for one channel.
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// Port for opening filtered change channels.
#[async_trait]
pub trait ChangeEventSource: Send + Sync {
    /// Open a channel delivering events for `filter.table_name()`.
    ///
    /// Sources may pre-filter by kind and column; the listener applies the
    /// full filter again, so a source is free to deliver a superset.
    async fn open(&self, filter: &ChangeFilter) -> Result<ChangeStream, ChangeEventSourceError>;
}
