//! Full-stack runs over the real process backend: worker exits must flow
//! back into the pool through the reaper, or runs would never settle.

use crate::fixtures::{definition, step, step_with_deps};
use foreman::agent::Agent;
use foreman::config::Config;
use foreman::orchestration::{SessionEvent, SessionPool, StepOutcome, WorkflowEngine};
use foreman::session::SpawnConfig;
use foreman::worker::ProcessBackend;
use foreman::workflow::WorkflowRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn process_pool(
    command: &str,
) -> (
    SessionPool,
    Arc<ProcessBackend>,
    mpsc::Receiver<SessionEvent>,
) {
    let config = Config {
        command: Some(command.to_string()),
        ..Default::default()
    };
    let backend = Arc::new(ProcessBackend::new(Agent::from_config(&config)));
    let (tx, rx) = mpsc::channel(100);
    let pool = SessionPool::new(4, Duration::from_millis(500), backend.clone(), tx);
    (pool, backend, rx)
}

#[tokio::test]
async fn run_settles_when_workers_exit_successfully() {
    let mut registry = WorkflowRegistry::new();
    registry
        .register(definition(
            "pipeline",
            vec![step("first"), step_with_deps("second", &["first"])],
        ))
        .unwrap();

    // `true` exits 0 immediately, so both steps should succeed
    let (pool, backend, mut events) = process_pool("true");
    let reaper = backend.spawn_reaper(pool.clone(), Duration::from_millis(10));
    let engine = WorkflowEngine::new(registry, pool.clone(), "/tmp");

    let result = timeout(
        Duration::from_secs(10),
        engine.run(
            "pipeline",
            HashMap::new(),
            &mut events,
            CancellationToken::new(),
        ),
    )
    .await
    .expect("run must settle once workers exit")
    .unwrap();
    reaper.abort();

    assert!(result.all_succeeded());
    assert_eq!(pool.active_count().await, 0);
}

#[tokio::test]
async fn run_settles_when_workers_exit_with_failure() {
    let mut registry = WorkflowRegistry::new();
    registry
        .register(definition(
            "doomed",
            vec![step("breaks"), step_with_deps("after", &["breaks"])],
        ))
        .unwrap();

    // `false` exits 1, so the step fails and its dependent is skipped
    let (pool, backend, mut events) = process_pool("false");
    let reaper = backend.spawn_reaper(pool.clone(), Duration::from_millis(10));
    let engine = WorkflowEngine::new(registry, pool.clone(), "/tmp");

    let result = timeout(
        Duration::from_secs(10),
        engine.run(
            "doomed",
            HashMap::new(),
            &mut events,
            CancellationToken::new(),
        ),
    )
    .await
    .expect("run must settle once workers exit")
    .unwrap();
    reaper.abort();

    assert!(matches!(
        result.outcome("breaks"),
        Some(StepOutcome::Failed { reason }) if reason.contains("failure status")
    ));
    assert!(matches!(
        result.outcome("after"),
        Some(StepOutcome::Skipped { .. })
    ));
}

#[tokio::test]
async fn aborted_worker_is_reported_and_removed() {
    let (pool, backend, _events) = process_pool("sleep");
    let reaper = backend.spawn_reaper(pool.clone(), Duration::from_millis(10));

    let (session, handle) = pool
        .spawn(SpawnConfig::new("/tmp", "sleeper"), "60")
        .await
        .unwrap();
    handle.send_abort().await;

    // the reaper observes the killed child and settles the session
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while pool.status(session.id).await.is_some() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "aborted session never settled"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    reaper.abort();

    assert!(pool.get_handle(session.id).await.is_none());
}
