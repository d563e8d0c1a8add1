//! Integration tests for FerroSync
//!
//! These tests drive the propagation engine end to end, against a scripted
//! replica that records the global order of operations and against real
//! directories through the local replica provider.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ferrosync_config::Config;
use ferrosync_engine::{
    ActionRegion, EngineBuilder, Fingerprinter, LocalReplica, STATUS_DELETIONS, STATUS_FINISHED,
    STATUS_UPDATES,
};
use ferrosync_tests::test_utils::{
    conflict_item, copy_item, delete_item, engine, merge_item, problem_item, props_item, roots,
    update_item, write_plan,
};
use ferrosync_tests::{Event, Op, RecordingObserver, RecordingReplica};
use ferrosync_types::{
    ContentStatus, Decision, Direction, Outcome, Props, ReconciledItem, ReplicaRoot, ReplicaState,
    Resolution, SizeInfo, SyncPath,
};
use rstest::rstest;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Wait until `condition` holds, polling the runtime
async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition was never reached");
}

#[rstest]
#[case(1)]
#[case(8)]
#[tokio::test]
async fn test_copies_finish_before_deletions_begin(#[case] capacity: u32) {
    let replica = Arc::new(RecordingReplica::new().with_delay(Duration::from_millis(5)));
    let observer = Arc::new(RecordingObserver::new());
    let engine = engine(replica.clone(), observer.clone(), capacity, false).unwrap();

    let mut items = vec![delete_item("a"), copy_item("b", 10)];
    let (left, right) = roots();
    let report = engine.commit(&left, &right, &mut items).await.unwrap();

    assert_eq!(report.succeeded, 2);
    let copy_end = replica
        .position(&Event::End(Op::CopyGeneric, "b".to_string()))
        .unwrap();
    let delete_begin = replica
        .position(&Event::Begin(Op::Delete, "a".to_string()))
        .unwrap();
    assert!(copy_end < delete_begin);
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(8)]
#[tokio::test]
async fn test_no_deletion_before_every_update_is_terminal(#[case] capacity: u32) {
    let replica = Arc::new(
        RecordingReplica::new()
            .with_delay(Duration::from_millis(2))
            .fail_transient("update-3", "permission denied"),
    );
    let observer = Arc::new(RecordingObserver::new());
    let engine = engine(replica.clone(), observer, capacity, false).unwrap();

    let mut items = Vec::new();
    for i in 0..6 {
        items.push(delete_item(&format!("gone-{}", i)));
        items.push(update_item(&format!("update-{}", i), 64));
        items.push(copy_item(&format!("new-{}", i), 8));
    }
    items.push(props_item("props"));
    items.push(merge_item("merged", 16));

    let (left, right) = roots();
    let report = engine.commit(&left, &right, &mut items).await.unwrap();
    assert_eq!(report.failed, 1);

    let events = replica.events();
    let first_delete = events
        .iter()
        .position(|e| matches!(e, Event::Begin(Op::Delete, _)))
        .unwrap();
    let last_update_end = events
        .iter()
        .rposition(|e| matches!(e, Event::End(op, _) if *op != Op::Delete))
        .unwrap();
    assert!(last_update_end < first_delete);
    assert!(replica.peak_concurrency() <= capacity as usize);
}

#[tokio::test]
async fn test_transient_failure_is_isolated() {
    let replica = Arc::new(RecordingReplica::new().fail_transient("big.bin", "disk full"));
    let observer = Arc::new(RecordingObserver::new());
    let engine = engine(replica.clone(), observer.clone(), 4, false).unwrap();

    let mut items = vec![
        update_item("big.bin", 1000),
        copy_item("small.txt", 5),
        props_item("meta.txt"),
        delete_item("old.txt"),
    ];
    let (left, right) = roots();
    let report = engine.commit(&left, &right, &mut items).await.unwrap();

    assert_eq!(
        items[0].outcome(),
        &Outcome::Failed {
            reason: "disk full".to_string(),
            transcript: None,
        }
    );
    for item in &items[1..] {
        assert_eq!(item.outcome(), &Outcome::Succeeded, "{}", item.path);
    }
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.partially_transferred, 0);
    assert!(!report.is_clean());
    assert!(observer
        .lines()
        .iter()
        .any(|line| line == "Failed: big.bin: disk full"));
}

#[tokio::test]
async fn test_partial_transfer_is_counted() {
    let replica =
        Arc::new(RecordingReplica::new().fail_transient_after("big.bin", 400, "disk full"));
    let observer = Arc::new(RecordingObserver::new());
    let engine = engine(replica, observer.clone(), 2, false).unwrap();

    let mut items = vec![update_item("big.bin", 1000), update_item("ok.bin", 100)];
    let (left, right) = roots();
    let report = engine.commit(&left, &right, &mut items).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.partially_transferred, 1);
    assert_eq!(report.bytes_transferred, 500);
    assert_eq!(observer.progress_total(), 500);
}

#[tokio::test]
async fn test_percentage_reaches_completion() {
    let replica = Arc::new(
        RecordingReplica::new().fail_transient_after("broken", 4, "disk full"),
    );
    let observer = Arc::new(RecordingObserver::new());
    let engine = engine(replica, observer.clone(), 2, false).unwrap();

    let mut items = vec![copy_item("a", 30), copy_item("broken", 10), delete_item("c")];
    let (left, right) = roots();
    engine.commit(&left, &right, &mut items).await.unwrap();

    let percentages = observer.percentages();
    assert!(!percentages.is_empty());
    assert!(percentages.iter().all(|p| (0.0..=100.0).contains(p)));
    assert_eq!(percentages.iter().cloned().fold(0.0, f64::max), 100.0);
}

#[tokio::test]
async fn test_fingerprints_follow_content() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("ten.bin");
    std::fs::write(&file, b"0123456789").unwrap();

    let fingerprinter = Fingerprinter::new(4096);
    let path = SyncPath::new("ten.bin").unwrap();
    let first = fingerprinter.whole_file(temp_dir.path(), &path).await.unwrap();
    let second = fingerprinter.whole_file(temp_dir.path(), &path).await.unwrap();
    assert_eq!(first.to_hex(), second.to_hex());
    assert_eq!(first.to_hex().len(), 2 * first.len());

    std::fs::write(&file, b"0123456780").unwrap();
    let flipped = fingerprinter.whole_file(temp_dir.path(), &path).await.unwrap();
    assert_ne!(first.to_hex(), flipped.to_hex());

    let truncated = fingerprinter.byte_range(&file, 5, 10).await.unwrap_err();
    assert!(truncated.is_transient());
    assert_eq!(truncated.to_string(), "truncated file");
}

#[tokio::test]
async fn test_declined_merge_touches_nothing() {
    let replica = Arc::new(RecordingReplica::new());
    let observer = Arc::new(RecordingObserver::declining());
    let engine = engine(replica.clone(), observer.clone(), 20, true).unwrap();

    let mut items = vec![merge_item("notes.txt", 32)];
    let (left, right) = roots();
    let report = engine.commit(&left, &right, &mut items).await.unwrap();

    assert_eq!(items[0].outcome(), &Outcome::SucceededDeclined);
    assert_eq!(report.declined, 1);
    assert_eq!(observer.merge_requests(), 1);
    assert!(replica.mutations().is_empty());
}

#[tokio::test]
async fn test_merge_commits_without_asking_when_not_required() {
    let replica = Arc::new(RecordingReplica::new());
    let observer = Arc::new(RecordingObserver::declining());
    let engine = engine(replica.clone(), observer.clone(), 20, false).unwrap();

    let mut items = vec![merge_item("notes.txt", 32)];
    let (left, right) = roots();
    engine.commit(&left, &right, &mut items).await.unwrap();

    assert_eq!(items[0].outcome(), &Outcome::Succeeded);
    assert_eq!(observer.merge_requests(), 0);
    assert_eq!(replica.mutations(), vec![(Op::Merge, "notes.txt".to_string())]);
}

#[tokio::test]
async fn test_shrinking_region_never_preempts() {
    let region = Arc::new(ActionRegion::new(20));
    let gate = Arc::new(Semaphore::new(0));

    let running: Vec<_> = (0..5)
        .map(|_| {
            let region = region.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                let _permit = region.admit().await.unwrap();
                gate.acquire().await.unwrap().forget();
            })
        })
        .collect();

    wait_until(|| region.in_flight() == 5).await;
    region.resize(1);

    let sixth_started = Arc::new(AtomicBool::new(false));
    let sixth = {
        let region = region.clone();
        let started = sixth_started.clone();
        tokio::spawn(async move {
            let _permit = region.admit().await.unwrap();
            started.store(true, Ordering::SeqCst);
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(region.in_flight(), 5);
    assert!(!sixth_started.load(Ordering::SeqCst));

    // Four finish; one is still holding the only slot
    gate.add_permits(4);
    wait_until(|| region.in_flight() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!sixth_started.load(Ordering::SeqCst));

    gate.add_permits(1);
    for handle in running {
        handle.await.unwrap();
    }
    sixth.await.unwrap();
    assert!(sixth_started.load(Ordering::SeqCst));
    assert_eq!(region.in_flight(), 0);
}

#[tokio::test]
async fn test_live_resize_during_commit() {
    let replica = Arc::new(RecordingReplica::new().with_delay(Duration::from_millis(20)));
    let observer = Arc::new(RecordingObserver::new());
    let engine = engine(replica.clone(), observer, 20, false).unwrap();

    let mut items: Vec<_> = (0..25).map(|i| copy_item(&format!("f{}", i), 1)).collect();
    let (left, right) = roots();

    let (report, ()) = tokio::join!(engine.commit(&left, &right, &mut items), async {
        wait_until(|| replica.running() == 20).await;
        engine.set_max_simultaneous_transfers(1).unwrap();
    });

    let report = report.unwrap();
    assert_eq!(report.succeeded, 25);
    assert_eq!(replica.peak_concurrency(), 20);
    assert_eq!(engine.region().capacity(), 1);
    assert_eq!(engine.max_simultaneous_transfers(), 1);
}

#[rstest]
#[case(1)]
#[case(8)]
#[tokio::test]
async fn test_region_bounds_concurrency(#[case] capacity: u32) {
    let replica = Arc::new(RecordingReplica::new().with_delay(Duration::from_millis(3)));
    let observer = Arc::new(RecordingObserver::new());
    let engine = engine(replica.clone(), observer, capacity, false).unwrap();

    let mut items: Vec<_> = (0..24)
        .map(|i| copy_item(&format!("file-{}", i), 4))
        .collect();
    let (left, right) = roots();
    engine.commit(&left, &right, &mut items).await.unwrap();

    assert!(replica.peak_concurrency() <= capacity as usize);
    assert!(engine.region().peak_in_flight() <= capacity as usize);
    assert_eq!(engine.region().in_flight(), 0);
    if capacity == 1 {
        assert_eq!(replica.peak_concurrency(), 1);
    }
}

#[tokio::test]
async fn test_second_commit_is_idempotent() {
    let replica = Arc::new(RecordingReplica::new().fail_transient("bad", "io error"));
    let observer = Arc::new(RecordingObserver::new());
    let engine = engine(replica.clone(), observer, 4, false).unwrap();

    let mut items = vec![
        copy_item("a", 3),
        update_item("bad", 3),
        delete_item("c"),
        problem_item("d", "name clash"),
        conflict_item("e"),
    ];
    let (left, right) = roots();
    let first = engine.commit(&left, &right, &mut items).await.unwrap();
    let events_after_first = replica.events().len();

    let second = engine.commit(&left, &right, &mut items).await.unwrap();

    assert_eq!(replica.events().len(), events_after_first);
    assert_eq!(
        (first.succeeded, first.declined, first.failed, first.skipped, first.not_started),
        (second.succeeded, second.declined, second.failed, second.skipped, second.not_started)
    );
    assert_eq!((second.succeeded, second.failed, second.skipped), (2, 1, 2));
    assert_eq!(second.bytes_transferred, 0);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_problems_and_conflicts_are_skipped() {
    let replica = Arc::new(RecordingReplica::new());
    let observer = Arc::new(RecordingObserver::new());
    let engine = engine(replica.clone(), observer.clone(), 4, false).unwrap();

    let mut items = vec![
        problem_item("broken", "name has invalid characters"),
        conflict_item("both"),
    ];
    let (left, right) = roots();
    let report = engine.commit(&left, &right, &mut items).await.unwrap();

    assert_eq!(report.skipped, 2);
    assert!(replica.events().is_empty());
    assert!(items.iter().all(|item| item.outcome() == &Outcome::Skipped));

    let lines = observer.lines();
    assert!(lines.contains(&"Skipping broken: name has invalid characters".to_string()));
    assert!(lines.contains(&"Skipping both: conflicting updates".to_string()));
}

#[tokio::test]
async fn test_abort_stops_admissions() {
    let replica = Arc::new(RecordingReplica::new().with_delay(Duration::from_millis(30)));
    let observer = Arc::new(RecordingObserver::new());
    let engine = engine(replica.clone(), observer, 1, false).unwrap();
    let abort = engine.abort_handle();

    let mut items: Vec<_> = (0..5).map(|i| copy_item(&format!("f{}", i), 1)).collect();
    let (left, right) = roots();

    let (report, ()) = tokio::join!(engine.commit(&left, &right, &mut items), async {
        wait_until(|| replica.running() == 1).await;
        abort.abort();
    });

    let report = report.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.not_started, 4);
    assert_eq!(
        items
            .iter()
            .filter(|item| item.outcome() == &Outcome::Pending)
            .count(),
        4
    );

    // A later call picks up what was never started
    let resumed = engine.commit(&left, &right, &mut items).await.unwrap();
    assert_eq!(resumed.succeeded, 5);
    assert_eq!(resumed.not_started, 0);
}

#[tokio::test]
async fn test_abort_before_commit_applies_to_that_call() {
    let replica = Arc::new(RecordingReplica::new());
    let engine = engine(replica.clone(), Arc::new(RecordingObserver::new()), 4, false).unwrap();
    let (left, right) = roots();

    let mut items = vec![copy_item("a", 1), delete_item("b")];
    engine.abort_handle().abort();
    let report = engine.commit(&left, &right, &mut items).await.unwrap();

    assert_eq!(report.not_started, 2);
    assert!(replica.events().is_empty());
    assert!(!engine.abort_handle().is_aborted());

    let resumed = engine.commit(&left, &right, &mut items).await.unwrap();
    assert_eq!(resumed.succeeded, 2);
}

#[tokio::test]
async fn test_item_that_cannot_start_halts_the_call() {
    let replica = Arc::new(RecordingReplica::new());
    let engine = engine(replica.clone(), Arc::new(RecordingObserver::new()), 1, false).unwrap();

    // Left over from an interrupted call
    let mut stuck = copy_item("stuck", 1);
    stuck.advance(Outcome::Running).unwrap();
    let mut items = vec![stuck, copy_item("next", 1), copy_item("later", 1)];

    let (left, right) = roots();
    let error = engine.commit(&left, &right, &mut items).await.unwrap_err();

    assert!(matches!(error, ferrosync_types::Error::InvariantViolation { .. }));
    assert!(replica.mutations().is_empty());
    assert_eq!(items[1].outcome(), &Outcome::Pending);
    assert_eq!(items[2].outcome(), &Outcome::Pending);
}

#[tokio::test]
async fn test_fatal_error_ends_the_call() {
    let replica = Arc::new(RecordingReplica::new().fail_fatal("root-owned", "lost connection"));
    let observer = Arc::new(RecordingObserver::new());
    let engine = engine(replica.clone(), observer.clone(), 2, false).unwrap();

    let mut items = vec![
        copy_item("root-owned", 1),
        copy_item("fine", 1),
        delete_item("stale"),
    ];
    let (left, right) = roots();
    let error = engine.commit(&left, &right, &mut items).await.unwrap_err();

    assert!(!error.is_transient());
    assert_eq!(error.to_string(), "Fatal error: lost connection");
    assert!(matches!(items[0].outcome(), Outcome::Failed { .. }));
    assert_eq!(items[2].outcome(), &Outcome::Pending);
    assert!(replica
        .events()
        .iter()
        .all(|e| !matches!(e, Event::Begin(Op::Delete, _))));
    assert!(observer
        .lines()
        .last()
        .unwrap()
        .contains("stopped by fatal error: Fatal error: lost connection"));
}

#[tokio::test]
async fn test_duplicate_paths_are_rejected() {
    let replica = Arc::new(RecordingReplica::new());
    let engine = engine(replica.clone(), Arc::new(RecordingObserver::new()), 4, false).unwrap();

    let mut items = vec![copy_item("twice", 1), delete_item("twice")];
    let (left, right) = roots();
    assert!(engine.commit(&left, &right, &mut items).await.is_err());
    assert!(replica.events().is_empty());
}

#[tokio::test]
async fn test_transfer_log_and_status() {
    let replica = Arc::new(RecordingReplica::new());
    let observer = Arc::new(RecordingObserver::new());
    let engine = engine(replica, observer.clone(), 4, false).unwrap();

    let mut items = vec![copy_item("new.txt", 3), delete_item("old.txt")];
    let (left, right) = roots();
    let report = engine.commit(&left, &right, &mut items).await.unwrap();

    let lines = observer.lines();
    assert!(lines[0].starts_with(&format!("===== Propagation {} started at", report.run_id)));
    assert!(lines
        .last()
        .unwrap()
        .ends_with(&format!(": {} =====", report)));
    assert!(lines.contains(&"[BGN] Copying new.txt from /left to /right".to_string()));
    assert!(lines.contains(&"[END] Copying new.txt".to_string()));
    assert!(lines.contains(&"[BGN] Deleting old.txt from /right".to_string()));
    assert!(lines.contains(&"[END] Deleting old.txt".to_string()));

    assert_eq!(
        observer.statuses(),
        vec![STATUS_UPDATES, STATUS_DELETIONS, STATUS_FINISHED]
    );
}

#[tokio::test]
async fn test_plan_file_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let items = vec![copy_item("a", 2), merge_item("b", 4), problem_item("c", "odd")];
    let plan = write_plan(temp_dir.path(), &items).unwrap();

    let text = std::fs::read_to_string(plan).unwrap();
    let mut loaded: Vec<ReconciledItem> = serde_json::from_str(&text).unwrap();
    assert_eq!(loaded, items);

    let replica = Arc::new(RecordingReplica::new());
    let engine = engine(replica, Arc::new(RecordingObserver::new()), 4, false).unwrap();
    let (left, right) = roots();
    let report = engine.commit(&left, &right, &mut loaded).await.unwrap();
    assert_eq!((report.succeeded, report.skipped), (2, 1));
}

fn local_file(size: u64, status: ContentStatus) -> ReplicaState {
    ReplicaState::File(Props::with_size(SizeInfo::data(size)), status)
}

#[tokio::test]
async fn test_local_replicas_converge() {
    let temp_dir = TempDir::new().unwrap();
    let left = temp_dir.path().join("left");
    let right = temp_dir.path().join("right");
    std::fs::create_dir_all(left.join("docs")).unwrap();
    std::fs::create_dir_all(&right).unwrap();

    std::fs::write(left.join("docs/readme.md"), b"# hello\n").unwrap();
    std::fs::write(left.join("changed.txt"), b"new contents").unwrap();
    std::fs::write(right.join("changed.txt"), b"old").unwrap();
    std::fs::write(right.join("removed.txt"), b"bye").unwrap();
    std::fs::write(right.join("from-right.txt"), b"right side").unwrap();

    let log_file = temp_dir.path().join("transfer.log");
    let mut config = Config::default();
    config.propagation.max_simultaneous_transfers = 2;
    config.propagation.verify_transfers = true;
    config.logging.log_file = Some(log_file.clone());

    let engine = EngineBuilder::new()
        .with_config(config.clone())
        .with_replicas(Arc::new(LocalReplica::from_config(&config.propagation)))
        .with_observer(Arc::new(RecordingObserver::new()))
        .build()
        .unwrap();

    let updated = ContentStatus::ContentsUpdated(SizeInfo::data(12));
    let mut items = vec![
        ReconciledItem::new(
            SyncPath::new("docs").unwrap(),
            Decision::Resolved(Resolution::new(
                ReplicaState::Directory(Props::default(), ContentStatus::ContentsUpdated(SizeInfo::data(8))),
                ReplicaState::Absent,
                Direction::ToRight,
            )),
        ),
        ReconciledItem::new(
            SyncPath::new("changed.txt").unwrap(),
            Decision::Resolved(Resolution::new(
                local_file(12, updated),
                local_file(3, ContentStatus::Unchanged),
                Direction::ToRight,
            )),
        ),
        ReconciledItem::new(
            SyncPath::new("removed.txt").unwrap(),
            Decision::Resolved(Resolution::new(
                ReplicaState::Absent,
                local_file(3, ContentStatus::Unchanged),
                Direction::ToRight,
            )),
        ),
        ReconciledItem::new(
            SyncPath::new("from-right.txt").unwrap(),
            Decision::Resolved(Resolution::new(
                ReplicaState::Absent,
                local_file(10, ContentStatus::ContentsUpdated(SizeInfo::data(10))),
                Direction::ToLeft,
            )),
        ),
    ];

    let report = engine
        .commit(&ReplicaRoot::local(&left), &ReplicaRoot::local(&right), &mut items)
        .await
        .unwrap();

    assert_eq!(report.succeeded, 4, "{:?}", items);
    assert_eq!(
        std::fs::read(right.join("docs/readme.md")).unwrap(),
        b"# hello\n"
    );
    assert_eq!(
        std::fs::read(right.join("changed.txt")).unwrap(),
        b"new contents"
    );
    assert!(!right.join("removed.txt").exists());
    assert_eq!(
        std::fs::read(left.join("from-right.txt")).unwrap(),
        b"right side"
    );

    let log = std::fs::read_to_string(log_file).unwrap();
    assert!(log.contains("[END] Updating file changed.txt"));
    assert!(log.contains(&format!("===== Propagation {} finished at", report.run_id)));
}
