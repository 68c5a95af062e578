use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use livequery::{
    ChangeKind, Direction, DocumentSnapshot, EventKinds, ExecutionError, InMemoryQuery, LiveCollection, LiveError,
    QuerySnapshot, QueueContext, RawDocumentChange, Schedulers, SnapshotMetadata, StabilityTracker, UpstreamError,
};

const TIMEOUT: Duration = Duration::from_secs(2);

fn ranked() -> InMemoryQuery {
    InMemoryQuery::ordered_by("rank", Direction::Ascending)
}

fn live(query: &InMemoryQuery) -> LiveCollection {
    LiveCollection::new(Arc::new(query.clone()), Schedulers::default())
}

#[test]
fn snapshot_changes_tracks_query_order() {
    let query = ranked();
    let live = live(&query);
    let stream = live.snapshot_changes(None::<EventKinds>).unwrap().stream().unwrap();

    let initial = stream.recv_timeout(TIMEOUT).unwrap();
    assert!(initial.is_empty());

    query
        .batch()
        .set("b", json!({"rank": 2}))
        .set("a", json!({"rank": 1}))
        .commit()
        .unwrap();
    assert_eq!(stream.recv_timeout(TIMEOUT).unwrap().ids(), vec!["a", "b"]);

    query.set("a", json!({"rank": 3})).unwrap();
    assert_eq!(stream.recv_timeout(TIMEOUT).unwrap().ids(), vec!["b", "a"]);

    query.delete("b").unwrap();
    let projection = stream.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(projection.ids(), vec!["a"]);
    assert_eq!(projection[0].document.get("rank"), Some(&json!(3)));
}

#[test]
fn snapshot_changes_starts_from_existing_results() {
    let query = ranked();
    query.set("x", json!({"rank": 5})).unwrap();
    query.set("y", json!({"rank": 4})).unwrap();

    let live = live(&query);
    let stream = live.snapshot_changes([ChangeKind::Added]).unwrap().stream().unwrap();
    assert_eq!(stream.recv_timeout(TIMEOUT).unwrap().ids(), vec!["y", "x"]);
}

#[test]
fn state_changes_filters_and_skips_empty_batches() {
    let query = ranked();
    let live = live(&query);
    let stream = live.state_changes(["removed"]).unwrap().stream().unwrap();

    query.set("a", json!({"rank": 1})).unwrap();
    query.set("b", json!({"rank": 2})).unwrap();
    query.delete("a").unwrap();

    let batch = stream.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].kind, ChangeKind::Removed);
    assert_eq!(batch[0].document.id.as_str(), "a");
    assert_eq!(batch[0].old_index, Some(0));
    assert!(stream.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn empty_kind_selection_matches_full_selection() {
    let query = ranked();
    let live = live(&query);
    let none = live.state_changes(Vec::<ChangeKind>::new()).unwrap().stream().unwrap();
    let all = live
        .state_changes([ChangeKind::Added, ChangeKind::Modified, ChangeKind::Removed])
        .unwrap()
        .stream()
        .unwrap();

    query.set("a", json!({"rank": 1})).unwrap();
    query.set("a", json!({"rank": 2})).unwrap();
    query.delete("a").unwrap();

    for _ in 0..3 {
        assert_eq!(none.recv_timeout(TIMEOUT).unwrap(), all.recv_timeout(TIMEOUT).unwrap());
    }
}

#[test]
fn audit_trail_only_appends() {
    let query = ranked();
    let live = live(&query);
    let stream = live.audit_trail(None::<EventKinds>).unwrap().stream().unwrap();

    query.set("a", json!({"rank": 1})).unwrap();
    query.set("b", json!({"rank": 2})).unwrap();
    query.delete("a").unwrap();

    let mut previous = stream.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(previous.len(), 1);
    for expected in [2, 3] {
        let next = stream.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(next.len(), expected);
        assert!(next.extends(&previous));
        previous = next;
    }
    let kinds: Vec<_> = previous.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::Added, ChangeKind::Added, ChangeKind::Removed]);
}

#[test]
fn upstream_error_terminates_every_subscription() {
    let query = ranked();
    let live = live(&query);
    let projections = live.snapshot_changes(None::<EventKinds>).unwrap().stream().unwrap();
    let changes = live.state_changes(None::<EventKinds>).unwrap().stream().unwrap();
    assert_eq!(query.listener_count(), 2);
    assert!(projections.recv_timeout(TIMEOUT).unwrap().is_empty());

    query.fail(UpstreamError::new("permission-denied", "missing grant"));

    for err in [
        projections.recv_timeout(TIMEOUT).map(|_| ()).unwrap_err(),
        changes.recv_timeout(TIMEOUT).map(|_| ()).unwrap_err(),
    ] {
        assert!(err.is_upstream());
        assert_eq!(err.upstream().map(|e| e.code.as_str()), Some("permission-denied"));
        assert!(!err.is_fatal());
    }
    assert!(!projections.is_active());
    assert_eq!(query.listener_count(), 0);

    let after = projections.recv_timeout(TIMEOUT).unwrap_err();
    assert!(matches!(after, LiveError::Execution(livequery::ExecutionError::Disconnected { .. })));
}

#[test]
fn unsubscribe_releases_listener() {
    let query = ranked();
    let live = live(&query);
    let stream = live.values(None).unwrap().stream().unwrap();
    assert_eq!(query.listener_count(), 1);

    stream.unsubscribe();
    stream.unsubscribe();
    assert_eq!(query.listener_count(), 0);
    assert!(!stream.is_active());

    let sub = live.values(None).unwrap().subscribe(|_| {}).unwrap();
    assert_eq!(query.listener_count(), 1);
    drop(sub);
    assert_eq!(query.listener_count(), 0);
}

#[test]
fn subscriptions_do_not_share_state() {
    let query = ranked();
    query.set("a", json!({"rank": 1})).unwrap();
    let live = live(&query);
    let view = live.audit_trail(None::<EventKinds>).unwrap();

    let first = view.stream().unwrap();
    assert_eq!(first.recv_timeout(TIMEOUT).unwrap().len(), 1);
    query.set("b", json!({"rank": 2})).unwrap();
    assert_eq!(first.recv_timeout(TIMEOUT).unwrap().len(), 2);

    let second = view.stream().unwrap();
    let trail = second.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(trail.len(), 2);
    assert!(trail.iter().all(|r| r.kind == ChangeKind::Added));
    assert_ne!(first.subscription_id(), second.subscription_id());

    drop(first);
    query.delete("a").unwrap();
    assert_eq!(second.recv_timeout(TIMEOUT).unwrap().len(), 3);
    assert_eq!(query.listener_count(), 1);
}

#[test]
fn values_inject_id_and_overwrite_payload_field() {
    let query = ranked();
    query.set("doc-1", json!({"rank": 1, "key": "stale"})).unwrap();
    let live = live(&query);

    let plain = live.values(None).unwrap().stream().unwrap();
    let keyed = live.values(Some("key")).unwrap().stream().unwrap();

    let plain = plain.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(plain[0].get("key"), Some(&json!("stale")));
    let keyed = keyed.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(keyed[0].get("key"), Some(&json!("doc-1")));
    assert_eq!(keyed[0].get("rank"), Some(&json!(1)));
}

#[derive(Debug, Deserialize, PartialEq)]
struct Task {
    id: String,
    rank: u32,
}

#[test]
fn typed_values_follow_projection() {
    let query = ranked();
    let live = live(&query);
    let stream = live.typed_values::<Task>(Some("id")).unwrap().stream().unwrap();
    assert!(stream.recv_timeout(TIMEOUT).unwrap().is_empty());

    query
        .batch()
        .set("t2", json!({"rank": 2}))
        .set("t1", json!({"rank": 1}))
        .commit()
        .unwrap();
    let tasks = stream.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(
        tasks,
        vec![
            Task {
                id: "t1".to_string(),
                rank: 1
            },
            Task {
                id: "t2".to_string(),
                rank: 2
            },
        ]
    );

    query.set("t3", json!({"rank": "high"})).unwrap();
    let err = stream.recv_timeout(TIMEOUT).unwrap_err();
    assert!(format!("{err}").contains("t3"));
    assert_eq!(query.listener_count(), 0);
}

#[test]
fn metadata_transition_reports_in_place_modifications() {
    let query = ranked();
    query.set_metadata(SnapshotMetadata {
        from_cache: true,
        has_pending_writes: false,
    })
    .unwrap();
    query.set("a", json!({"rank": 1})).unwrap();
    query.set("b", json!({"rank": 2})).unwrap();

    let live = live(&query);
    let stream = live.state_changes(["modified"]).unwrap().stream().unwrap();
    query.set_metadata(SnapshotMetadata::synced()).unwrap();

    let batch = stream.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(batch.len(), 2);
    for (i, record) in batch.iter().enumerate() {
        assert_eq!(record.kind, ChangeKind::Modified);
        assert_eq!(record.old_index, Some(i));
        assert_eq!(record.new_index, Some(i));
        assert!(!record.document.metadata.from_cache);
    }
}

#[test]
fn first_emission_waits_for_stability() {
    let query = ranked();
    let foreground = Arc::new(QueueContext::new("ui"));
    let tracker = StabilityTracker::new();
    let schedulers = Schedulers::new(Arc::new(livequery::InlineContext), foreground.clone())
        .with_stability(tracker.clone());
    let live = LiveCollection::new(Arc::new(query.clone()), schedulers);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let busy = tracker.begin();
    let _sub = live
        .snapshot_changes(None::<EventKinds>)
        .unwrap()
        .subscribe(move |p| {
            let ids: Vec<String> = p.unwrap().ids().into_iter().map(str::to_string).collect();
            sink.lock().unwrap().push(ids);
        })
        .unwrap();

    query.set("a", json!({"rank": 1})).unwrap();
    query.set("b", json!({"rank": 2})).unwrap();
    assert_eq!(foreground.run_until_idle(), 0);
    assert!(seen.lock().unwrap().is_empty());

    drop(busy);
    assert_eq!(foreground.run_until_idle(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![vec!["a".to_string(), "b".to_string()]]);

    query.delete("a").unwrap();
    assert_eq!(foreground.run_until_idle(), 1);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[test]
fn gate_can_be_disabled() {
    let query = ranked();
    let foreground = Arc::new(QueueContext::new("ui"));
    let tracker = StabilityTracker::new();
    let schedulers = Schedulers::new(Arc::new(livequery::InlineContext), foreground.clone())
        .with_stability(tracker.clone())
        .with_gate(false);
    let live = LiveCollection::new(Arc::new(query.clone()), schedulers);

    let _busy = tracker.begin();
    let _sub = live.snapshot_changes(None::<EventKinds>).unwrap().subscribe(|_| {}).unwrap();
    assert_eq!(foreground.run_until_idle(), 1);
}

#[test]
fn unsubscribe_discards_queued_emissions() {
    let query = ranked();
    let foreground = Arc::new(QueueContext::new("ui"));
    let schedulers = Schedulers::new(Arc::new(livequery::InlineContext), foreground.clone());
    let live = LiveCollection::new(Arc::new(query.clone()), schedulers);

    let seen = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&seen);
    let sub = live
        .state_changes(None::<EventKinds>)
        .unwrap()
        .subscribe(move |_| *sink.lock().unwrap() += 1)
        .unwrap();
    query.set("a", json!({"rank": 1})).unwrap();
    assert_eq!(foreground.pending(), 1);

    sub.unsubscribe();
    foreground.run_until_idle();
    assert_eq!(*seen.lock().unwrap(), 0);
}

#[test]
fn get_delivers_on_foreground_context() {
    let query = ranked();
    query.set("a", json!({"rank": 1})).unwrap();
    let foreground = Arc::new(QueueContext::new("ui"));
    let schedulers = Schedulers::new(Arc::new(livequery::InlineContext), foreground.clone());
    let live = LiveCollection::new(Arc::new(query.clone()), schedulers);

    let got = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&got);
    live.get(move |result| *sink.lock().unwrap() = Some(result.map(|s| s.len())))
        .unwrap();
    assert!(got.lock().unwrap().is_none());
    assert_eq!(foreground.run_until_idle(), 1);
    assert_eq!(got.lock().unwrap().as_ref().map(|r| *r.as_ref().unwrap()), Some(1));
    assert_eq!(query.listener_count(), 0);

    query.fail(UpstreamError::new("unavailable", "offline"));
    let handle = LiveCollection::new(Arc::new(query.clone()), Schedulers::default())
        .get_handle()
        .unwrap();
    let err = handle.join().unwrap_err();
    assert!(err.is_retryable());
}

#[test]
fn subscribe_on_failed_query_reports_error() {
    let query = ranked();
    query.fail(UpstreamError::new("unauthenticated", "signed out"));
    let live = live(&query);
    let stream = live.state_changes(None::<EventKinds>).unwrap().stream().unwrap();
    let err = stream.recv_timeout(TIMEOUT).unwrap_err();
    assert!(err.is_upstream());
    assert!(!err.is_retryable());
}

fn raw_snapshot(changes: Vec<RawDocumentChange>) -> QuerySnapshot {
    QuerySnapshot {
        docs: vec![],
        changes,
        metadata: SnapshotMetadata::synced(),
        read_time: Utc::now(),
    }
}

#[test]
fn out_of_order_remove_is_fatal_and_releases_listener() {
    let query = ranked();
    let live = live(&query);
    let stream = live.snapshot_changes(None::<EventKinds>).unwrap().stream().unwrap();
    assert!(stream.recv_timeout(TIMEOUT).unwrap().is_empty());

    let ghost = DocumentSnapshot::from_value("ghost", json!({"rank": 1}));
    query.emit_raw(raw_snapshot(vec![RawDocumentChange::removed(ghost, 3)]));

    let err = stream.recv_timeout(TIMEOUT).unwrap_err();
    assert!(matches!(err, LiveError::Ordering(_)));
    assert!(err.is_fatal());
    assert!(!err.is_upstream());
    assert_eq!(query.listener_count(), 0);
    assert!(!stream.is_active());
}

#[test]
fn unknown_change_type_terminates_with_malformed_change() {
    let query = ranked();
    let live = live(&query);
    let stream = live.state_changes(None::<EventKinds>).unwrap().stream().unwrap();

    let mut renamed = RawDocumentChange::added(DocumentSnapshot::from_value("a", json!({"rank": 1})), 0);
    renamed.change_type = "renamed".to_string();
    query.emit_raw(raw_snapshot(vec![renamed]));

    let err = stream.recv_timeout(TIMEOUT).unwrap_err();
    assert!(matches!(err, LiveError::Execution(ExecutionError::MalformedChange { position: 0, .. })));
    assert!(!err.is_fatal());
    assert!(!err.is_upstream());
    assert_eq!(query.listener_count(), 0);
    assert!(!stream.is_active());
}

#[test]
fn receive_after_unsubscribe_reports_closed() {
    let query = ranked();
    query.set("a", json!({"rank": 1})).unwrap();
    let live = live(&query);
    let stream = live.values(None).unwrap().stream().unwrap();
    let _ = stream.recv_timeout(TIMEOUT).unwrap();

    stream.unsubscribe();
    assert!(matches!(stream.recv(), Err(LiveError::Execution(ExecutionError::Closed))));
    assert!(matches!(
        stream.recv_timeout(TIMEOUT),
        Err(LiveError::Execution(ExecutionError::Closed))
    ));
    assert!(matches!(stream.try_recv(), Some(Err(LiveError::Execution(ExecutionError::Closed)))));
}
