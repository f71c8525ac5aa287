//! End-to-end workflow runs: registry -> engine -> pool -> stub workers.

use crate::fixtures::{
    definition, harness, spawn_worker_sim, step, step_with_deps, WorkerScript,
};
use foreman::error::Error;
use foreman::orchestration::{StepOutcome, WorkflowEngine};
use foreman::workflow::WorkflowRegistry;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn draft_spec_workflow_orders_steps_and_resolves_issue_id() {
    let mut registry = WorkflowRegistry::new();
    let mut research = step("research");
    research.prompt = "Research the background of {{ issue_id }}".to_string();
    let mut draft = step_with_deps("draft", &["research"]);
    draft.prompt =
        "Draft a spec for {{ issue_id }} based on: {{ research.output }}".to_string();
    registry
        .register(definition("draft-spec", vec![research, draft]))
        .unwrap();

    let mut h = harness(4, Duration::from_millis(100));
    let engine = WorkflowEngine::new(registry, h.pool.clone(), "/tmp");
    let sim = spawn_worker_sim(h.pool.clone(), h.backend.clone(), |_| WorkerScript::Complete);

    let result = engine
        .run(
            "draft-spec",
            vars(&[("issue_id", "ISSUE-1")]),
            &mut h.events,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    sim.abort();

    assert!(result.all_succeeded());

    // research dispatched first, draft only after it succeeded
    let launches = h.backend.launches();
    assert_eq!(h.backend.launch_order(), vec!["research", "draft"]);

    // both resolved prompts carry the literal issue id
    assert!(launches[0].prompt.contains("ISSUE-1"));
    assert!(launches[1].prompt.contains("ISSUE-1"));
    // draft's prompt embeds research's reported output
    assert!(launches[1].prompt.contains("research-output"));
}

#[tokio::test]
async fn cyclic_workflow_is_rejected_at_registration() {
    let mut registry = WorkflowRegistry::new();
    let result = registry.register(definition(
        "cyclic",
        vec![
            step_with_deps("a", &["b"]),
            step_with_deps("b", &["a"]),
        ],
    ));
    assert!(matches!(result, Err(Error::Validation(_))));
    // never stored, so never executable
    assert!(!registry.contains("cyclic"));
}

#[tokio::test]
async fn step_dispatched_only_after_all_dependencies_succeed() {
    let mut registry = WorkflowRegistry::new();
    registry
        .register(definition(
            "join",
            vec![
                step("left"),
                step("right"),
                step_with_deps("merge", &["left", "right"]),
            ],
        ))
        .unwrap();

    let mut h = harness(4, Duration::from_millis(100));
    let engine = WorkflowEngine::new(registry, h.pool.clone(), "/tmp");
    let sim = spawn_worker_sim(h.pool.clone(), h.backend.clone(), |_| WorkerScript::Complete);

    let result = engine
        .run("join", HashMap::new(), &mut h.events, CancellationToken::new())
        .await
        .unwrap();
    sim.abort();

    assert!(result.all_succeeded());
    let order = h.backend.launch_order();
    let merge_pos = order.iter().position(|n| n == "merge").unwrap();
    assert!(merge_pos > order.iter().position(|n| n == "left").unwrap());
    assert!(merge_pos > order.iter().position(|n| n == "right").unwrap());
}

#[tokio::test]
async fn failed_step_skips_transitive_dependents_without_spawning_them() {
    let mut registry = WorkflowRegistry::new();
    registry
        .register(definition(
            "chain",
            vec![
                step("a"),
                step_with_deps("b", &["a"]),
                step_with_deps("c", &["b"]),
                step_with_deps("unrelated", &["a"]),
            ],
        ))
        .unwrap();

    let mut h = harness(4, Duration::from_millis(100));
    let engine = WorkflowEngine::new(registry, h.pool.clone(), "/tmp");
    let sim = spawn_worker_sim(h.pool.clone(), h.backend.clone(), |name| match name {
        "b" => WorkerScript::Fail("worker crashed".to_string()),
        _ => WorkerScript::Complete,
    });

    let result = engine
        .run("chain", HashMap::new(), &mut h.events, CancellationToken::new())
        .await
        .unwrap();
    sim.abort();

    assert!(matches!(
        result.outcome("b"),
        Some(StepOutcome::Failed { reason }) if reason == "worker crashed"
    ));
    // skip reason names the failed upstream step
    assert!(matches!(
        result.outcome("c"),
        Some(StepOutcome::Skipped { reason }) if reason.contains("'b'")
    ));
    assert!(result.outcome("unrelated").unwrap().succeeded());

    // no session was ever spawned for the skipped step
    assert!(!h.backend.launch_order().contains(&"c".to_string()));
}

#[tokio::test]
async fn workflow_loaded_from_toml_file_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("release.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        r#"
id = "release"
name = "Release checklist"

[[steps]]
id = "changelog"
name = "changelog"
prompt = "Write the changelog for {{{{ version }}}}"

[[steps]]
id = "announce"
name = "announce"
depends_on = ["changelog"]
prompt = "Announce: {{{{ changelog.output }}}}"
"#
    )
    .unwrap();

    let mut registry = WorkflowRegistry::new();
    let workflow_id = registry.load_file(&path).unwrap();
    assert_eq!(workflow_id, "release");
    assert_eq!(
        registry.get("release").unwrap().source_path,
        path.display().to_string()
    );

    let mut h = harness(4, Duration::from_millis(100));
    let engine = WorkflowEngine::new(registry, h.pool.clone(), "/tmp");
    let sim = spawn_worker_sim(h.pool.clone(), h.backend.clone(), |_| WorkerScript::Complete);

    let result = engine
        .run(
            "release",
            vars(&[("version", "1.2.0")]),
            &mut h.events,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    sim.abort();

    assert!(result.all_succeeded());
    assert!(h.backend.launches()[0].prompt.contains("1.2.0"));
}

#[tokio::test]
async fn cancellation_aborts_running_sessions_and_skips_the_rest() {
    let mut registry = WorkflowRegistry::new();
    registry
        .register(definition(
            "stuck",
            vec![step("hang"), step_with_deps("after", &["hang"])],
        ))
        .unwrap();

    let mut h = harness(4, Duration::from_millis(100));
    let engine = WorkflowEngine::new(registry, h.pool.clone(), "/tmp");
    // worker never reports back
    let sim = spawn_worker_sim(h.pool.clone(), h.backend.clone(), |_| WorkerScript::Ignore);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let result = engine
        .run("stuck", HashMap::new(), &mut h.events, cancel)
        .await
        .unwrap();
    sim.abort();

    assert!(result.cancelled);
    assert!(!result.all_succeeded());
    // the hung session got an abort signal
    assert_eq!(h.backend.aborted().len(), 1);
    assert!(matches!(
        result.outcome("after"),
        Some(StepOutcome::Skipped { .. })
    ));
}
