#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::wait_for;
use hovel::core::error::HovelError;
use hovel::core::store::{EnvStatus, EnvironmentRecord, EnvironmentStore, FsEnvironmentStore};
use hovel::plugins::tasks::{BuildStatusView, BuildTaskStatus, TaskTracker};
use serde_json::json;
use std::sync::mpsc;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn build_status_prefers_tracked_task_over_record() {
    let tmp = tempdir().unwrap();
    let store = FsEnvironmentStore::new(tmp.path());
    let mut rec = EnvironmentRecord::new("b", 8001, store.directory_of("b"));
    rec.status = EnvStatus::Running;
    store.save("b", &rec).unwrap();

    let tracker = TaskTracker::new();
    match tracker.find_latest_for_branch("b", &store).unwrap() {
        BuildStatusView::Record {
            status, message, ..
        } => {
            assert_eq!(status, EnvStatus::Running);
            assert_eq!(message, "Branch status: running");
        }
        other => panic!("expected record view, got {:?}", other),
    }

    let id = tracker.register("b").unwrap();
    match tracker.find_latest_for_branch("b", &store).unwrap() {
        BuildStatusView::Task(task) => assert_eq!(task.id, id),
        other => panic!("expected task view, got {:?}", other),
    }
}

#[test]
fn build_status_for_unknown_branch_is_not_found() {
    let tmp = tempdir().unwrap();
    let store = FsEnvironmentStore::new(tmp.path());
    let tracker = TaskTracker::new();
    assert!(matches!(
        tracker.find_latest_for_branch("nobody", &store),
        Err(HovelError::NotFound(_))
    ));
}

#[test]
fn record_view_serializes_with_source_tag() {
    let tmp = tempdir().unwrap();
    let store = FsEnvironmentStore::new(tmp.path());
    store
        .save("b", &EnvironmentRecord::new("b", 8001, store.directory_of("b")))
        .unwrap();
    let view = TaskTracker::new().find_latest_for_branch("b", &store).unwrap();
    let value = serde_json::to_value(&view).unwrap();
    assert_eq!(value["source"], "record");
    assert_eq!(value["status"], "created");
    assert_eq!(value["record"]["port"], 8001);
}

#[test]
fn scheduled_jobs_progress_independently_per_branch() {
    let tracker = TaskTracker::new();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let slow = tracker
        .schedule("slow", move |handle| {
            handle.advance(BuildTaskStatus::Building, 10, "building").unwrap();
            release_rx.recv_timeout(Duration::from_secs(5)).ok();
            handle.complete("done", json!({"ok": true})).unwrap();
        })
        .unwrap();
    let fast = tracker
        .schedule("fast", |handle| {
            handle.advance(BuildTaskStatus::Building, 10, "building").unwrap();
            handle.advance(BuildTaskStatus::Starting, 50, "starting").unwrap();
            handle.fail("compose up exited 1").unwrap();
        })
        .unwrap();

    let failed = wait_for(Duration::from_secs(5), || {
        tracker
            .get(&fast)
            .unwrap()
            .filter(|t| t.status.is_terminal())
    })
    .expect("fast task finishes");
    assert_eq!(failed.status, BuildTaskStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("compose up exited 1"));
    assert!(failed.result.is_none());

    // The slow branch is still mid-build and blocks a second build for itself.
    assert!(!tracker.get(&slow).unwrap().unwrap().status.is_terminal());
    assert!(matches!(
        tracker.schedule("slow", |_| {}),
        Err(HovelError::Conflict(_))
    ));

    release_tx.send(()).unwrap();
    let done = wait_for(Duration::from_secs(5), || {
        tracker
            .get(&slow)
            .unwrap()
            .filter(|t| t.status == BuildTaskStatus::Completed)
    })
    .expect("slow task completes");
    assert_eq!(done.progress, 100);
    assert_eq!(done.result, Some(json!({"ok": true})));
}

#[test]
fn reap_keeps_unfinished_tasks() {
    let tracker = TaskTracker::new();
    tracker.register("a").unwrap();
    let b = tracker.register("b").unwrap();
    tracker.handle(&b).complete("done", json!(null)).unwrap();

    // Finished just now, so a zero-hour window drops it and keeps the pending one.
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(tracker.reap(0).unwrap(), 1);
    assert_eq!(tracker.len(), 1);
    assert_eq!(tracker.reap(24).unwrap(), 0);
}

#[test]
fn panicking_job_fails_its_task_and_frees_the_branch() {
    let tracker = TaskTracker::new();
    let id = tracker
        .schedule("b", |handle| {
            handle.advance(BuildTaskStatus::Building, 10, "building").unwrap();
            panic!("compose exploded");
        })
        .unwrap();

    let failed = wait_for(Duration::from_secs(5), || {
        tracker
            .get(&id)
            .unwrap()
            .filter(|t| t.status.is_terminal())
    })
    .expect("panicked task becomes terminal");
    assert_eq!(failed.status, BuildTaskStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("compose exploded"));
    assert!(failed.completed_at.is_some());

    assert!(tracker.register("b").is_ok());
}
