//! Change events delivered by an external change source, and the filters
//! subscriptions register against them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ActorId, Record, RecordId};

/// Kind of row change reported by the change source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    /// A record was created.
    Insert,
    /// A record was modified.
    Update,
    /// A record was removed.
    Delete,
}

impl ChangeKind {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a change, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangePayload {
    /// New record.
    Insert {
        /// Inserted record.
        record: Record,
    },
    /// Modified record. `old` is only present when the source captures it.
    Update {
        /// Previous state, if known.
        old: Option<Record>,
        /// New state.
        record: Record,
    },
    /// Removed record.
    Delete {
        /// Last known state.
        old: Record,
    },
}

/// Equality filter on one column, e.g. `class_id=eq.7b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    /// Field name.
    pub column: String,
    /// Required value.
    pub value: Value,
}

impl ColumnFilter {
    /// Match records whose `column` equals `value`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether `record` satisfies the filter.
    pub fn matches(&self, record: &Record) -> bool {
        record.field(&self.column) == Some(&self.value)
    }
}

impl fmt::Display for ColumnFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::String(text) => write!(f, "{}=eq.{text}", self.column),
            other => write!(f, "{}=eq.{other}", self.column),
        }
    }
}

/// Notification that a record changed outside the local session.
///
/// Ephemeral: produced by the change source and consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Table (or collection) the change happened in.
    pub table: String,
    /// Column filter the source matched this event against, if any.
    pub filter_match: Option<ColumnFilter>,
    /// Actor whose write produced the change, when the source knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ActorId>,
    /// The change itself.
    #[serde(flatten)]
    pub payload: ChangePayload,
}

impl ChangeEvent {
    /// Build an insert event.
    pub fn insert(table: impl Into<String>, record: Record) -> Self {
        Self::from_payload(table, ChangePayload::Insert { record })
    }

    /// Build an update event.
    pub fn update(table: impl Into<String>, old: Option<Record>, record: Record) -> Self {
        Self::from_payload(table, ChangePayload::Update { old, record })
    }

    /// Build a delete event.
    pub fn delete(table: impl Into<String>, old: Record) -> Self {
        Self::from_payload(table, ChangePayload::Delete { old })
    }

    fn from_payload(table: impl Into<String>, payload: ChangePayload) -> Self {
        Self {
            table: table.into(),
            filter_match: None,
            origin: None,
            payload,
        }
    }

    /// Attribute the change to `actor`.
    #[must_use]
    pub fn with_origin(mut self, actor: ActorId) -> Self {
        self.origin = Some(actor);
        self
    }

    /// Whether `actor` made this change. Unattributed changes belong to
    /// nobody.
    pub fn originated_by(&self, actor: &ActorId) -> bool {
        self.origin.as_ref() == Some(actor)
    }

    /// Kind of change.
    pub fn kind(&self) -> ChangeKind {
        match self.payload {
            ChangePayload::Insert { .. } => ChangeKind::Insert,
            ChangePayload::Update { .. } => ChangeKind::Update,
            ChangePayload::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// Record state the event is about: the new state for inserts and
    /// updates, the last known state for deletes.
    pub fn record(&self) -> &Record {
        match &self.payload {
            ChangePayload::Insert { record } | ChangePayload::Update { record, .. } => record,
            ChangePayload::Delete { old } => old,
        }
    }

    /// Identifier of the affected record.
    pub fn record_id(&self) -> &RecordId {
        self.record().id()
    }
}

/// Which change kinds a subscription wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindFilter {
    /// Every kind.
    #[default]
    All,
    /// A single kind.
    Only(ChangeKind),
}

impl KindFilter {
    fn admits(self, kind: ChangeKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => wanted == kind,
        }
    }
}

/// Filter a subscription registers with the change source.
///
/// # Examples
/// ```
/// use gradesync::domain::listener::{ChangeEvent, ChangeFilter, ChangeKind, ColumnFilter};
/// use gradesync::domain::{Record, RecordId};
/// use serde_json::json;
///
/// let filter = ChangeFilter::table("grades")
///     .only(ChangeKind::Update)
///     .column(ColumnFilter::eq("class_id", "7b"));
/// let fields = json!({"class_id": "7b", "grade": 12}).as_object().cloned().unwrap_or_default();
/// let record = Record::new(RecordId::new("g2").expect("id"), fields);
/// assert!(filter.matches(&ChangeEvent::update("grades", None, record.clone())));
/// assert!(!filter.matches(&ChangeEvent::insert("grades", record)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    table: String,
    kind: KindFilter,
    column: Option<ColumnFilter>,
}

impl ChangeFilter {
    /// Subscribe to every change in `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            kind: KindFilter::All,
            column: None,
        }
    }

    /// Restrict to a single change kind.
    #[must_use]
    pub fn only(mut self, kind: ChangeKind) -> Self {
        self.kind = KindFilter::Only(kind);
        self
    }

    /// Restrict to records matching a column filter.
    #[must_use]
    pub fn column(mut self, column: ColumnFilter) -> Self {
        self.column = Some(column);
        self
    }

    /// Table name.
    pub fn table_name(&self) -> &str {
        self.table.as_str()
    }

    /// Kind restriction.
    pub fn kind(&self) -> KindFilter {
        self.kind
    }

    /// Column restriction, if any.
    pub fn column_filter(&self) -> Option<&ColumnFilter> {
        self.column.as_ref()
    }

    /// Whether `event` should be delivered to this subscription.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.table == self.table
            && self.kind.admits(event.kind())
            && self
                .column
                .as_ref()
                .is_none_or(|column| column.matches(event.record()))
    }
}

impl fmt::Display for ChangeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            KindFilter::All => "*",
            KindFilter::Only(kind) => kind.as_str(),
        };
        write!(f, "{}:{kind}", self.table)?;
        if let Some(column) = &self.column {
            write!(f, ":{column}")?;
        }
        Ok(())
    }
}
