//! Speculative changes applied to a materialised collection.

use std::fmt;

use crate::domain::{FieldChanges, Record, RecordId};

/// Selects the records an update or delete applies to.
pub type RecordPredicate = Box<dyn Fn(&Record) -> bool + Send + Sync>;

/// Produces the replacement for a selected record.
pub type RecordTransform = Box<dyn Fn(&Record) -> Record + Send + Sync>;

/// A local change applied before the authoritative store confirms it.
///
/// # Examples
/// ```
/// use gradesync::domain::cache::OptimisticChange;
/// use gradesync::domain::RecordId;
/// use serde_json::json;
///
/// let changes = json!({"grade": 17}).as_object().cloned().unwrap_or_default();
/// let change = OptimisticChange::patch(RecordId::new("g1").expect("id"), changes);
/// assert_eq!(change.kind(), "update");
/// ```
pub enum OptimisticChange {
    /// Append a record. An existing record with the same id is replaced in place.
    Insert(Record),
    /// Replace every record matching `predicate` with `transform(record)`.
    Update {
        /// Record selector.
        predicate: RecordPredicate,
        /// Replacement function.
        transform: RecordTransform,
    },
    /// Remove every record matching the predicate.
    Delete(RecordPredicate),
}

impl OptimisticChange {
    /// Build an update from arbitrary closures.
    pub fn update<P, T>(predicate: P, transform: T) -> Self
    where
        P: Fn(&Record) -> bool + Send + Sync + 'static,
        T: Fn(&Record) -> Record + Send + Sync + 'static,
    {
        Self::Update {
            predicate: Box::new(predicate),
            transform: Box::new(transform),
        }
    }

    /// Merge `changes` into the record identified by `target_id`.
    pub fn patch(target_id: RecordId, changes: FieldChanges) -> Self {
        Self::update(
            move |record| record.id() == &target_id,
            move |record| record.apply_changes(&changes),
        )
    }

    /// Build a delete from an arbitrary predicate.
    pub fn delete<P>(predicate: P) -> Self
    where
        P: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self::Delete(Box::new(predicate))
    }

    /// Remove the record identified by `target_id`.
    pub fn remove(target_id: RecordId) -> Self {
        Self::delete(move |record| record.id() == &target_id)
    }

    /// Short name of the change kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update { .. } => "update",
            Self::Delete(_) => "delete",
        }
    }

    /// Materialise the change on top of `records`.
    pub(crate) fn apply(&self, records: &[Record]) -> Vec<Record> {
        match self {
            Self::Insert(new_record) => {
                let mut next = records.to_vec();
                match next.iter_mut().find(|r| r.id() == new_record.id()) {
                    Some(existing) => *existing = new_record.clone(),
                    None => next.push(new_record.clone()),
                }
                next
            }
            Self::Update {
                predicate,
                transform,
            } => records
                .iter()
                .map(|record| {
                    if predicate(record) {
                        transform(record)
                    } else {
                        record.clone()
                    }
                })
                .collect(),
            Self::Delete(predicate) => records
                .iter()
                .filter(|record| !predicate(record))
                .cloned()
                .collect(),
        }
    }
}

impl fmt::Debug for OptimisticChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert(record) => f.debug_tuple("Insert").field(record).finish(),
            Self::Update { .. } => f.write_str("Update { .. }"),
            Self::Delete(_) => f.write_str("Delete(..)"),
        }
    }
}
