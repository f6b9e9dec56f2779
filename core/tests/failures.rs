mod common;

use std::time::Duration;

use common::{harness, opts, run, task, Script};
use pretty_assertions::assert_eq;
use taskmesh_core::api::{EventRecord, ExecutorError, TaskState};

#[tokio::test]
async fn silent_task_times_out_while_sibling_completes() {
    let (backend, feed) = harness();
    backend.script("E", Script::Silent);
    backend.script("F", Script::ok(20));

    let report = run(
        vec![task("E", &[]), task("F", &[])],
        backend.clone(),
        feed,
        opts(2).with_task_timeout(Duration::from_millis(150)),
        None,
    )
    .await
    .unwrap();

    let e = &report.per_task["E"];
    assert_eq!(e.state, TaskState::Failed);
    assert_eq!(e.error_kind, Some("stream_timeout"));
    assert_eq!(report.per_task["F"].state, TaskState::Completed);
    assert!(backend.position("done:F").is_some());
    assert_eq!(report.failed_count, 1);
}

#[tokio::test]
async fn terminal_error_fails_task_and_leaves_dependent_pending() {
    let (backend, feed) = harness();
    backend.script("G", Script::fail("model refused the request", 20));

    let report = run(
        vec![task("G", &[]), task("H", &["G"]), task("I", &["H"])],
        backend.clone(),
        feed,
        opts(2),
        None,
    )
    .await
    .unwrap();

    let g = &report.per_task["G"];
    assert_eq!(g.state, TaskState::Failed);
    assert_eq!(g.error_kind, Some("backend_reported"));
    assert!(g.error.as_deref().unwrap().contains("model refused the request"));

    for id in ["H", "I"] {
        let t = &report.per_task[id];
        assert_eq!(t.state, TaskState::Pending);
        assert_eq!(t.blocked_by, vec!["G".to_string()]);
        assert!(t.started_at.is_none());
    }
    assert_eq!(backend.started(), vec!["G"]);
    assert_eq!(report.blocked_count, 2);
}

#[tokio::test]
async fn cycle_is_rejected_before_any_launch() {
    let (backend, feed) = harness();

    let err = run(
        vec![task("X", &["Y"]), task("Y", &["X"])],
        backend.clone(),
        feed,
        opts(2),
        None,
    )
    .await
    .unwrap_err();

    match err {
        ExecutorError::CircularDependency(path) => {
            assert!(path.contains("X") && path.contains("Y"));
        }
        other => panic!("expected cycle error, got {other}"),
    }
    assert!(backend.started().is_empty());
}

#[tokio::test]
async fn duplicate_task_names_are_rejected() {
    let (backend, feed) = harness();

    let err = run(
        vec![task("A", &[]), task("A", &[])],
        backend.clone(),
        feed,
        opts(2),
        None,
    )
    .await
    .unwrap_err();

    assert!(err.is_structural());
    assert!(backend.started().is_empty());
}

#[tokio::test]
async fn feed_closing_mid_run_is_fatal() {
    let (backend, feed) = harness();
    backend.script("stuck", Script::Silent);

    // Close the feed from the outside shortly after launch.
    let closer = backend.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        closer.close_feed();
    });

    let err = run(
        vec![task("stuck", &[])],
        backend,
        feed,
        opts(1),
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExecutorError::FeedClosed(_)));
}

#[tokio::test]
async fn late_terminal_event_after_timeout_is_ignored() {
    let (backend, feed) = harness();
    backend.script("slow", Script::Silent);
    backend.script("next", Script::ok(200));

    let late = backend.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        late.emit(EventRecord::success("ses-slow"));
    });

    let report = run(
        vec![task("slow", &[]), task("next", &[])],
        backend,
        feed,
        opts(2).with_task_timeout(Duration::from_millis(60)),
        None,
    )
    .await
    .unwrap();

    assert_eq!(report.per_task["slow"].state, TaskState::Failed);
    assert_eq!(report.per_task["slow"].error_kind, Some("stream_timeout"));
    assert_eq!(report.per_task["next"].state, TaskState::Completed);
}

#[tokio::test]
async fn terminal_event_sent_during_dispatch_is_attributed() {
    let (backend, feed) = harness();
    backend.script("G", Script::FailBeforeReturn("bad model".into()));
    backend.script("F", Script::ok(20));

    let report = run(
        vec![task("G", &[]), task("F", &[])],
        backend,
        feed,
        opts(2).with_task_timeout(Duration::from_millis(500)),
        None,
    )
    .await
    .unwrap();

    let g = &report.per_task["G"];
    assert_eq!(g.state, TaskState::Failed);
    assert_eq!(g.error_kind, Some("backend_reported"));
    assert!(g.error.as_deref().unwrap().contains("bad model"));
    assert_eq!(g.stats.operation_count, 1);
    assert_eq!(g.stats.categories.get("read"), Some(&1));
    assert_eq!(report.per_task["F"].state, TaskState::Completed);
}

#[tokio::test]
async fn reused_correlation_id_fails_only_that_task() {
    let (backend, feed) = harness();
    backend.script("first", Script::ok(80));
    backend.alias("second", "ses-first");

    let report = run(
        vec![task("first", &[]), task("second", &[]), task("third", &[])],
        backend.clone(),
        feed,
        opts(3),
        None,
    )
    .await
    .unwrap();

    let second = &report.per_task["second"];
    assert_eq!(second.state, TaskState::Failed);
    assert_eq!(second.error_kind, Some("spawn"));
    assert!(second.error.as_deref().unwrap().contains("ses-first"));
    assert!(second.correlation_id.is_none());

    assert_eq!(report.per_task["first"].state, TaskState::Completed);
    assert_eq!(report.per_task["third"].state, TaskState::Completed);
    // The duplicate was caught before its work was dispatched.
    assert!(!backend.started().contains(&"second".to_string()));
}

#[tokio::test]
async fn rejected_dispatch_fails_task_and_releases_listener() {
    let dir = tempfile::tempdir().unwrap();
    let (backend, feed) = harness();
    backend.script("bad", Script::RejectDispatch("unknown model".into()));

    let report = run(
        vec![task("bad", &[]), task("good", &[])],
        backend.clone(),
        feed,
        opts(2).with_session_log(dir.path()),
        None,
    )
    .await
    .unwrap();

    let bad = &report.per_task["bad"];
    assert_eq!(bad.state, TaskState::Failed);
    assert_eq!(bad.error_kind, Some("spawn"));
    assert!(bad.error.as_deref().unwrap().contains("unknown model"));
    assert_eq!(report.per_task["good"].state, TaskState::Completed);

    let log = std::fs::read_to_string(dir.path().join("test-run").join("bad.jsonl")).unwrap();
    let summary: serde_json::Value =
        serde_json::from_str(log.lines().last().unwrap()).unwrap();
    assert_eq!(summary["type"], "summary");
    assert_eq!(summary["outcome"], "error");
}
