//! Unit tests for subscription lifecycle, filtering, and dispatch.

use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::*;
use crate::domain::{ActorId, Record, RecordId};

struct DropGuard(Arc<AtomicUsize>);

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ScriptedSource {
    senders: Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    refuse: AtomicBool,
}

impl ScriptedSource {
    fn emit(&self, event: &ChangeEvent) {
        for sender in self.senders.lock().expect("senders").iter() {
            if sender.send(event.clone()).is_err() {
                tracing::debug!(table = %event.table, "scripted subscriber closed");
            }
        }
    }

    fn drop_channels(&self) {
        self.senders.lock().expect("senders").clear();
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeEventSource for ScriptedSource {
    async fn open(&self, _filter: &ChangeFilter) -> Result<ChangeStream, ChangeEventSourceError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChangeEventSourceError::rejected("table not published"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.senders.lock().expect("senders").push(sender);
        let guard = DropGuard(Arc::clone(&self.closed));
        Ok(stream::unfold((receiver, guard), |(mut receiver, guard)| async move {
            receiver.recv().await.map(|event| (event, (receiver, guard)))
        })
        .boxed())
    }
}

fn record(id: &str, fields: Value) -> Record {
    Record::new(
        RecordId::new(id).expect("record id"),
        fields.as_object().cloned().expect("object literal"),
    )
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn recording_handlers() -> (ChangeHandlers, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handlers = ChangeHandlers::catch_all(move |event| {
        sink.lock()
            .expect("seen")
            .push(format!("{}:{}", event.kind(), event.record_id()));
    });
    (handlers, seen)
}

#[fixture]
fn key() -> CollectionKey {
    CollectionKey::new("grades:class-7b:2026-s1").expect("collection key")
}

#[fixture]
fn source() -> Arc<ScriptedSource> {
    Arc::new(ScriptedSource::default())
}

#[rstest]
#[tokio::test]
async fn delivers_matching_events_in_emission_order(
    key: CollectionKey,
    source: Arc<ScriptedSource>,
) {
    let listener = ChangeListener::new(source.clone());
    let (handlers, seen) = recording_handlers();
    listener
        .subscribe(key.clone(), ChangeFilter::table("grades"), handlers)
        .await
        .expect("subscribe");

    source.emit(&ChangeEvent::update("grades", None, record("g1", json!({"grade": 16}))));
    source.emit(&ChangeEvent::insert("attendance", record("a1", json!({}))));
    source.emit(&ChangeEvent::delete("grades", record("g3", json!({"grade": 9}))));
    source.emit(&ChangeEvent::insert("grades", record("g4", json!({"grade": 10}))));

    eventually(|| seen.lock().expect("seen").len() == 3).await;
    assert_eq!(
        *seen.lock().expect("seen"),
        vec!["UPDATE:g1", "DELETE:g3", "INSERT:g4"]
    );
}

#[rstest]
#[tokio::test]
async fn resubscribing_tears_down_previous_channel(
    key: CollectionKey,
    source: Arc<ScriptedSource>,
) {
    let listener = ChangeListener::new(source.clone());
    let (first, first_seen) = recording_handlers();
    let (second, second_seen) = recording_handlers();

    listener
        .subscribe(key.clone(), ChangeFilter::table("grades"), first)
        .await
        .expect("first subscribe");
    listener
        .subscribe(
            key.clone(),
            ChangeFilter::table("grades").only(ChangeKind::Update),
            second,
        )
        .await
        .expect("second subscribe");

    eventually(|| source.closed() == 1).await;
    source.emit(&ChangeEvent::update("grades", None, record("g2", json!({"grade": 13}))));

    eventually(|| second_seen.lock().expect("seen").len() == 1).await;
    assert!(first_seen.lock().expect("seen").is_empty());
    assert_eq!(source.opened.load(Ordering::SeqCst), 2);
    assert!(listener.is_active(&key));
}

#[rstest]
#[tokio::test]
async fn unsubscribe_twice_tears_down_once(key: CollectionKey, source: Arc<ScriptedSource>) {
    let listener = ChangeListener::new(source.clone());
    let (handlers, seen) = recording_handlers();
    let handle = listener
        .subscribe(key.clone(), ChangeFilter::table("grades"), handlers)
        .await
        .expect("subscribe");

    listener.unsubscribe(&handle);
    listener.unsubscribe(&handle);

    eventually(|| source.closed() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(source.closed(), 1);
    assert!(!listener.is_active(&key));

    source.emit(&ChangeEvent::insert("grades", record("g5", json!({}))));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(seen.lock().expect("seen").is_empty());
}

#[rstest]
#[tokio::test]
async fn stale_handle_leaves_newer_subscription_alone(
    key: CollectionKey,
    source: Arc<ScriptedSource>,
) {
    let listener = ChangeListener::new(source.clone());
    let stale = listener
        .subscribe(key.clone(), ChangeFilter::table("grades"), recording_handlers().0)
        .await
        .expect("first subscribe");
    let live = listener
        .subscribe(key.clone(), ChangeFilter::table("grades"), recording_handlers().0)
        .await
        .expect("second subscribe");

    listener.unsubscribe(&stale);
    assert!(listener.is_active(&key));

    listener.unsubscribe(&live);
    assert!(!listener.is_active(&key));
    eventually(|| source.closed() == 2).await;
}

#[rstest]
#[tokio::test]
async fn lost_channel_marks_subscription_inactive(
    key: CollectionKey,
    source: Arc<ScriptedSource>,
) {
    let listener = ChangeListener::new(source.clone());
    let handle = listener
        .subscribe(key.clone(), ChangeFilter::table("grades"), recording_handlers().0)
        .await
        .expect("subscribe");
    assert!(listener.is_active(&key));

    source.drop_channels();

    eventually(|| !listener.is_active(&key)).await;
    listener.unsubscribe(&handle);
    listener.unsubscribe(&handle);
}

#[rstest]
#[tokio::test]
async fn refused_handshake_surfaces_error(key: CollectionKey, source: Arc<ScriptedSource>) {
    source.refuse.store(true, Ordering::SeqCst);
    let listener = ChangeListener::new(source.clone());

    let err = listener
        .subscribe(key.clone(), ChangeFilter::table("grades"), recording_handlers().0)
        .await
        .expect_err("subscribe refused");

    assert!(matches!(err, ListenerError::Subscribe { key: ref failed, .. } if failed == &key));
    assert!(!listener.is_active(&key));
}

#[rstest]
fn per_kind_handlers_route_by_kind() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (on_insert, on_delete) = (Arc::clone(&seen), Arc::clone(&seen));
    let handlers = ChangeHandlers::builder()
        .on_insert(move |_| on_insert.lock().expect("seen").push("insert"))
        .on_delete(move |_| on_delete.lock().expect("seen").push("delete"))
        .build();

    let row = record("g1", json!({}));
    assert!(handlers.dispatch(&ChangeEvent::insert("grades", row.clone())));
    assert!(!handlers.dispatch(&ChangeEvent::update("grades", None, row.clone())));
    assert!(handlers.dispatch(&ChangeEvent::delete("grades", row)));
    assert_eq!(*seen.lock().expect("seen"), vec!["insert", "delete"]);
}

#[rstest]
fn catch_all_takes_precedence_over_per_kind() {
    let per_kind = Arc::new(AtomicUsize::new(0));
    let catch_all = Arc::new(AtomicUsize::new(0));
    let (per_kind_sink, catch_all_sink) = (Arc::clone(&per_kind), Arc::clone(&catch_all));
    let handlers = ChangeHandlers::builder()
        .on_update(move |_| {
            per_kind_sink.fetch_add(1, Ordering::SeqCst);
        })
        .on_any(move |_| {
            catch_all_sink.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    handlers.dispatch(&ChangeEvent::update("grades", None, record("g1", json!({}))));
    handlers.dispatch(&ChangeEvent::insert("grades", record("g2", json!({}))));

    assert_eq!(catch_all.load(Ordering::SeqCst), 2);
    assert_eq!(per_kind.load(Ordering::SeqCst), 0);
}

#[rstest]
#[case::insert_in_class(ChangeEvent::insert("grades", record("g1", json!({"class_id": "7b"}))), true)]
#[case::other_class(ChangeEvent::insert("grades", record("g1", json!({"class_id": "8a"}))), false)]
#[case::delete_checks_old(ChangeEvent::delete("grades", record("g1", json!({"class_id": "7b"}))), true)]
#[case::missing_column(ChangeEvent::insert("grades", record("g1", json!({}))), false)]
#[case::other_table(ChangeEvent::insert("attendance", record("a1", json!({"class_id": "7b"}))), false)]
fn column_filter_matches_affected_record(#[case] event: ChangeEvent, #[case] expected: bool) {
    let filter = ChangeFilter::table("grades").column(ColumnFilter::eq("class_id", "7b"));
    assert_eq!(filter.matches(&event), expected);
}

#[rstest]
fn filter_renders_for_logs() {
    let filter = ChangeFilter::table("grades")
        .only(ChangeKind::Delete)
        .column(ColumnFilter::eq("class_id", "7b"));
    assert_eq!(filter.to_string(), "grades:DELETE:class_id=eq.7b");
    assert_eq!(ChangeFilter::table("grades").to_string(), "grades:*");
}

#[rstest]
fn change_event_deserialises_tagged_payload() {
    let event: ChangeEvent = serde_json::from_value(json!({
        "table": "grades",
        "filterMatch": null,
        "eventType": "UPDATE",
        "old": null,
        "record": {"id": "g2", "version": 3, "fields": {"grade": 13}}
    }))
    .expect("event");

    assert_eq!(event.kind(), ChangeKind::Update);
    assert_eq!(event.record_id().as_str(), "g2");
    assert_eq!(event.record().version(), 3);
}

#[rstest]
fn change_event_carries_originating_actor() {
    let actor = ActorId::new("3fa85f64-5717-4562-b3fc-2c963f66afa6").expect("actor");
    let event: ChangeEvent = serde_json::from_value(json!({
        "table": "grades",
        "filterMatch": null,
        "origin": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
        "eventType": "DELETE",
        "old": {"id": "g2", "version": 1, "fields": {}}
    }))
    .expect("event");

    assert!(event.originated_by(&actor));
    assert!(!event.originated_by(&ActorId::random()));
    assert!(!ChangeEvent::delete("grades", event.record().clone()).originated_by(&actor));
}
