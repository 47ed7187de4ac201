//! In-memory authoritative store that publishes its own changes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::InMemoryChangeFeed;
use crate::domain::listener::{ChangeEvent, ColumnFilter};
use crate::domain::ports::{AuthoritativeStore, AuthoritativeStoreError};
use crate::domain::{ActorId, CollectionKey, FieldChanges, Record, RecordId};

/// One table of records kept in memory.
///
/// Every write, insert, and delete is published to the attached
/// [`InMemoryChangeFeed`], the way a database replication feed would report
/// it. Collection keys all read the same table, narrowed by the column
/// filter.
pub struct InMemoryRecordStore {
    table: String,
    records: Mutex<BTreeMap<RecordId, Record>>,
    feed: Arc<InMemoryChangeFeed>,
}

impl InMemoryRecordStore {
    /// Create an empty `table` publishing to `feed`.
    pub fn new(table: impl Into<String>, feed: Arc<InMemoryChangeFeed>) -> Self {
        Self {
            table: table.into(),
            records: Mutex::new(BTreeMap::new()),
            feed,
        }
    }

    /// Load records without publishing events.
    #[must_use]
    pub fn with_records(self, records: impl IntoIterator<Item = Record>) -> Self {
        self.lock_records()
            .extend(records.into_iter().map(|record| (record.id().clone(), record)));
        self
    }

    /// Table name used in published events.
    pub fn table(&self) -> &str {
        self.table.as_str()
    }

    /// Current state of one record.
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.lock_records().get(id).cloned()
    }

    /// Create or replace a record and publish an insert.
    pub fn insert(&self, record: Record) {
        self.lock_records().insert(record.id().clone(), record.clone());
        self.publish(ChangeEvent::insert(self.table.clone(), record));
    }

    /// Remove a record and publish a delete.
    pub fn delete(&self, id: &RecordId) -> Result<Record, AuthoritativeStoreError> {
        let removed = self
            .lock_records()
            .remove(id)
            .ok_or_else(|| AuthoritativeStoreError::not_found(id.as_str()))?;
        self.publish(ChangeEvent::delete(self.table.clone(), removed.clone()));
        Ok(removed)
    }

    fn publish(&self, event: ChangeEvent) {
        let kind = event.kind();
        let record = event.record_id().clone();
        let receivers = self.feed.publish(event);
        debug!(table = %self.table, %kind, %record, receivers, "published record change");
    }

    fn lock_records(&self) -> MutexGuard<'_, BTreeMap<RecordId, Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AuthoritativeStore for InMemoryRecordStore {
    async fn read(
        &self,
        key: &CollectionKey,
        filter: Option<ColumnFilter>,
    ) -> Result<Vec<Record>, AuthoritativeStoreError> {
        let records: Vec<Record> = self
            .lock_records()
            .values()
            .filter(|record| filter.as_ref().is_none_or(|column| column.matches(record)))
            .cloned()
            .collect();
        debug!(collection = %key, count = records.len(), "read records");
        Ok(records)
    }

    async fn write(
        &self,
        actor: &ActorId,
        target_id: &RecordId,
        changes: &FieldChanges,
    ) -> Result<Record, AuthoritativeStoreError> {
        let (old, updated) = {
            let mut records = self.lock_records();
            let current = records
                .get_mut(target_id)
                .ok_or_else(|| AuthoritativeStoreError::not_found(target_id.as_str()))?;
            let updated = current.apply_changes(changes);
            let old = std::mem::replace(current, updated.clone());
            (old, updated)
        };
        self.publish(
            ChangeEvent::update(self.table.clone(), Some(old), updated.clone())
                .with_origin(actor.clone()),
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use rstest::{fixture, rstest};
    use serde_json::json;

    use crate::domain::listener::{ChangeFilter, ChangeKind};
    use crate::domain::ports::ChangeEventSource;
    use crate::test_support::records::{collection_key, fields, grade, record_id};

    #[fixture]
    fn feed() -> Arc<InMemoryChangeFeed> {
        Arc::new(InMemoryChangeFeed::default())
    }

    #[fixture]
    fn store(feed: Arc<InMemoryChangeFeed>) -> InMemoryRecordStore {
        InMemoryRecordStore::new("grades", feed).with_records([grade("g1", 15), grade("g2", 12)])
    }

    #[rstest]
    #[tokio::test]
    async fn write_merges_changes_and_publishes_update(feed: Arc<InMemoryChangeFeed>) {
        let store = InMemoryRecordStore::new("grades", Arc::clone(&feed))
            .with_records([grade("g2", 12)]);
        let mut changes = feed
            .open(&ChangeFilter::table("grades"))
            .await
            .expect("open");

        let actor = ActorId::random();

        let written = store
            .write(&actor, &record_id("g2"), &fields(json!({ "grade": 13 })))
            .await
            .expect("write");

        assert_eq!(written.field("grade"), Some(&json!(13)));
        assert_eq!(written.version(), 2);
        let event = changes.next().await.expect("update event");
        assert_eq!(event.kind(), ChangeKind::Update);
        assert_eq!(event.record(), &written);
        assert!(event.originated_by(&actor));
    }

    #[rstest]
    #[tokio::test]
    async fn write_to_missing_record_fails(store: InMemoryRecordStore) {
        let err = store
            .write(&ActorId::random(), &record_id("g9"), &fields(json!({ "grade": 1 })))
            .await
            .expect_err("missing record");
        assert_eq!(err, AuthoritativeStoreError::not_found("g9"));
    }

    #[rstest]
    #[tokio::test]
    async fn read_applies_column_filter(store: InMemoryRecordStore) {
        store.insert(Record::new(
            record_id("g3"),
            fields(json!({ "class_id": "8a", "grade": 11 })),
        ));

        let all = store
            .read(&collection_key("grades:all"), None)
            .await
            .expect("read all");
        let class = store
            .read(
                &collection_key("grades:class-7b"),
                Some(ColumnFilter::eq("class_id", "7b")),
            )
            .await
            .expect("read class");

        assert_eq!(all.len(), 3);
        assert_eq!(class.len(), 2);
    }

    #[rstest]
    fn delete_removes_record(store: InMemoryRecordStore) {
        let removed = store.delete(&record_id("g1")).expect("delete");

        assert_eq!(removed.id().as_str(), "g1");
        assert!(store.get(&record_id("g1")).is_none());
        assert!(store.delete(&record_id("g1")).is_err());
    }
}
