//! Executor lifecycle tests against the in-memory backend

use mend_sandbox::{
    EnvironmentStatus, ExecutionErrorKind, ExecutionRequest, IsolationBackend, SandboxConfig,
    SandboxExecutor,
};
use mend_test_utils::{harness_record, FakeBackend};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config() -> SandboxConfig {
    SandboxConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_timeout(Duration::from_secs(5))
}

fn executor(backend: &Arc<FakeBackend>) -> SandboxExecutor {
    let shared: Arc<dyn IsolationBackend> = backend.clone();
    SandboxExecutor::new(shared, config()).unwrap()
}

fn request() -> ExecutionRequest {
    ExecutionRequest::new(Some("def fix(values):\n    return sorted(values)\n".to_string()))
}

#[tokio::test]
async fn successful_run_releases_once() {
    let backend = Arc::new(FakeBackend::new());
    let result = executor(&backend).run(request()).await;

    assert!(result.success);
    assert_eq!(result.return_code(), Some(0));
    assert_eq!(result.performance_delta, 0.95);
    assert!(result.total_execution_time >= 0.0);
    assert_eq!(backend.creates(), 1);
    assert_eq!(backend.starts(), 1);
    assert_eq!(backend.kills(), 0);
    assert_eq!(backend.removes(), 1);
    assert_eq!(backend.live(), 0);
}

#[tokio::test]
async fn failing_tests_still_release_once() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_logs(format!("pip noise\n{}\n", harness_record(false, 1)))
            .with_statuses(vec![EnvironmentStatus::Exited { code: Some(0) }]),
    );
    let result = executor(&backend).run(request()).await;

    assert!(!result.success);
    assert_eq!(result.return_code(), Some(1));
    assert_eq!(backend.removes(), 1);
    assert_eq!(backend.live(), 0);
}

#[tokio::test]
async fn timeout_kills_exactly_once_and_returns_promptly() {
    let backend = Arc::new(FakeBackend::new().never_exits());
    let timeout = Duration::from_millis(200);

    let started = Instant::now();
    let result = executor(&backend)
        .run(request().with_timeout(timeout))
        .await;
    let elapsed = started.elapsed();

    assert!(!result.success);
    assert_eq!(result.error.as_ref().unwrap().kind, ExecutionErrorKind::Timeout);
    assert_eq!(result.execution_time, timeout.as_secs_f64());
    assert!(result.test_results.is_none());
    assert!(elapsed < timeout + Duration::from_secs(1), "took {elapsed:?}");
    assert_eq!(backend.kills(), 1);
    assert_eq!(backend.removes(), 1);
    assert_eq!(backend.live(), 0);
    assert_eq!(backend.log_reads.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stalled_log_read_counts_against_timeout() {
    let backend = Arc::new(FakeBackend::new().with_log_delay(Duration::from_secs(30)));
    let timeout = Duration::from_millis(200);

    let started = Instant::now();
    let result = executor(&backend)
        .run(request().with_timeout(timeout))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(result.error.as_ref().unwrap().kind, ExecutionErrorKind::Timeout);
    assert!(elapsed < timeout + Duration::from_secs(1), "took {elapsed:?}");
    assert_eq!(backend.log_reads.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(backend.kills(), 1);
    assert_eq!(backend.removes(), 1);
    assert_eq!(backend.live(), 0);
}

#[tokio::test]
async fn create_failure_is_setup_error_without_release() {
    let backend = Arc::new(FakeBackend::new().failing_create());
    let result = executor(&backend).run(request()).await;

    assert!(!result.success);
    assert_eq!(result.error.as_ref().unwrap().kind, ExecutionErrorKind::Setup);
    assert_eq!(result.risk_score, Some(1.0));
    assert!(result.test_results.is_none());
    assert_eq!(backend.polls(), 0);
    assert_eq!(backend.removes(), 0);
}

#[tokio::test]
async fn start_failure_releases_acquired_handle() {
    let backend = Arc::new(FakeBackend::new().failing_start());
    let result = executor(&backend).run(request()).await;

    assert!(!result.success);
    assert_eq!(result.error.as_ref().unwrap().kind, ExecutionErrorKind::Setup);
    assert_eq!(result.risk_score, Some(1.0));
    assert_eq!(backend.polls(), 0);
    assert_eq!(backend.removes(), 1);
    assert_eq!(backend.live(), 0);
}

#[tokio::test]
async fn unparseable_output_is_diagnostic_result() {
    let raw = "Traceback (most recent call last):\n  File \"harness.py\"\nMemoryError\n";
    let backend = Arc::new(FakeBackend::new().with_logs(raw));
    let result = executor(&backend).run(request()).await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_ref().unwrap().kind,
        ExecutionErrorKind::UnparseableOutput
    );
    assert_eq!(result.raw_output.as_deref(), Some(raw));
    assert_eq!(backend.removes(), 1);
}

#[tokio::test]
async fn offline_missing_requirement_is_setup_failure() {
    let record = r#"{"success": false, "test_results": null, "error": "missing requirements with no network access: numpy", "error_kind": "setup", "logs": ["setup failed"]}"#;
    let backend = Arc::new(FakeBackend::new().with_logs(record));
    let result = executor(&backend)
        .run(request().with_requirements(vec!["numpy".to_string()]))
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_ref().unwrap().kind, ExecutionErrorKind::Setup);
    assert_eq!(result.risk_score, Some(1.0));
    assert!(result.test_results.is_none());
    assert_eq!(backend.removes(), 1);
}

#[tokio::test]
async fn poll_failure_is_backend_error_and_releases() {
    let backend = Arc::new(FakeBackend::new().failing_poll());
    let result = executor(&backend).run(request()).await;

    assert!(!result.success);
    assert_eq!(result.error.as_ref().unwrap().kind, ExecutionErrorKind::Backend);
    assert_eq!(backend.removes(), 1);
}

#[tokio::test]
async fn release_errors_are_swallowed() {
    let backend = Arc::new(FakeBackend::new().failing_remove());
    let result = executor(&backend).run(request()).await;

    assert!(result.success);
    assert_eq!(backend.removes(), 1);
}

#[tokio::test]
async fn policy_rejection_builds_nothing() {
    let backend = Arc::new(FakeBackend::new());
    let result = executor(&backend)
        .run(ExecutionRequest::new(Some(
            "import subprocess\nsubprocess.run(['curl', 'evil'])".to_string(),
        )))
        .await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_ref().unwrap().kind,
        ExecutionErrorKind::PolicyRejected
    );
    assert_eq!(result.risk_score, Some(1.0));
    assert_eq!(backend.creates(), 0);
    assert_eq!(backend.removes(), 0);
}

#[tokio::test]
async fn environment_is_locked_down() {
    let backend = Arc::new(FakeBackend::new());
    executor(&backend).run(request()).await;

    let specs = backend.specs();
    assert_eq!(specs.len(), 1);
    let spec = &specs[0];
    assert!(spec.network_disabled);
    assert!(spec.no_new_privileges);
    assert_eq!(spec.user, "nobody");
    assert_eq!(spec.limits.memory_mb, 512);
    assert!(spec.mounts.iter().all(|m| m.read_only));
    // Workspace is deleted after the run
    assert!(!spec.mounts[0].source.exists());
}

#[tokio::test]
async fn cancelled_run_tears_down_within_grace_period() {
    let backend = Arc::new(FakeBackend::new().never_exits());
    let exec = executor(&backend);

    let task = tokio::spawn(async move { exec.run(request()).await });

    // Wait until the environment is running and being polled
    let deadline = Instant::now() + Duration::from_secs(2);
    while backend.polls() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(backend.live(), 1);

    task.abort();
    let _ = task.await;

    let deadline = Instant::now() + config().grace_period();
    while backend.live() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(backend.live(), 0);
    assert_eq!(backend.kills(), 1);
    assert_eq!(backend.removes(), 1);
}

#[tokio::test]
async fn cancelled_during_creation_tears_down_late_environment() {
    let create_delay = Duration::from_millis(300);
    let backend = Arc::new(FakeBackend::new().with_create_delay(create_delay));
    let exec = executor(&backend);

    let task = tokio::spawn(async move { exec.run(request()).await });

    // The backend has registered the environment but not answered yet
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.live(), 1);

    task.abort();
    let _ = task.await;

    let deadline = Instant::now() + create_delay + config().grace_period();
    while backend.live() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(backend.live(), 0);
    assert_eq!(backend.starts(), 0);
    assert_eq!(backend.removes(), 1);
}

#[tokio::test]
async fn concurrent_runs_use_separate_environments() {
    let backend = Arc::new(FakeBackend::new().with_statuses(vec![EnvironmentStatus::Exited {
        code: Some(0),
    }]));
    let exec = executor(&backend);

    let runs = (0..4).map(|_| {
        let exec = exec.clone();
        tokio::spawn(async move { exec.run(request()).await })
    });
    for run in runs.collect::<Vec<_>>() {
        assert!(run.await.unwrap().success);
    }

    assert_eq!(backend.creates(), 4);
    assert_eq!(backend.removes(), 4);
    let sources: std::collections::HashSet<_> =
        backend.specs().iter().map(|s| s.mounts[0].source.clone()).collect();
    assert_eq!(sources.len(), 4);
}
