//! Shared test fixtures: a scriptable worker backend and a pool harness.

use foreman::error::Result;
use foreman::orchestration::{SessionEvent, SessionPool};
use foreman::session::{Session, SessionId};
use foreman::worker::WorkerBackend;
use foreman::workflow::{StepSpec, WorkflowDefinition, BUILTIN_SOURCE};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One worker launch observed by the stub backend.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub session_id: SessionId,
    pub name: String,
    pub prompt: String,
}

/// Backend that records every launch and termination signal instead of
/// starting real processes. Tests play the worker role by reporting
/// outcomes through the pool.
#[derive(Default)]
pub struct StubBackend {
    launches: Mutex<Vec<LaunchRecord>>,
    aborted: Mutex<Vec<SessionId>>,
    killed: Mutex<Vec<SessionId>>,
}

impl StubBackend {
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().unwrap().clone()
    }

    pub fn launch_order(&self) -> Vec<String> {
        self.launches().into_iter().map(|l| l.name).collect()
    }

    pub fn aborted(&self) -> Vec<SessionId> {
        self.aborted.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<SessionId> {
        self.killed.lock().unwrap().clone()
    }
}

impl WorkerBackend for StubBackend {
    fn launch(&self, session: &Session, prompt: &str) -> Result<()> {
        self.launches.lock().unwrap().push(LaunchRecord {
            session_id: session.id,
            name: session.name.clone(),
            prompt: prompt.to_string(),
        });
        Ok(())
    }

    fn signal_abort(&self, id: SessionId) {
        self.aborted.lock().unwrap().push(id);
    }

    fn force_kill(&self, id: SessionId) {
        self.killed.lock().unwrap().push(id);
    }
}

/// Pool plus its backend and event receiver, wired together.
pub struct Harness {
    pub pool: SessionPool,
    pub backend: Arc<StubBackend>,
    pub events: mpsc::Receiver<SessionEvent>,
}

pub fn harness(max_sessions: usize, grace: Duration) -> Harness {
    let (tx, events) = mpsc::channel(100);
    let backend = Arc::new(StubBackend::default());
    let pool = SessionPool::new(max_sessions, grace, backend.clone(), tx);
    Harness {
        pool,
        backend,
        events,
    }
}

pub fn step(id: &str) -> StepSpec {
    StepSpec {
        id: id.to_string(),
        name: id.to_string(),
        depends_on: Vec::new(),
        prompt: format!("run {id}"),
    }
}

pub fn step_with_deps(id: &str, deps: &[&str]) -> StepSpec {
    StepSpec {
        depends_on: deps.iter().map(|d| d.to_string()).collect(),
        ..step(id)
    }
}

pub fn definition(id: &str, steps: Vec<StepSpec>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        source_path: BUILTIN_SOURCE.to_string(),
        steps,
    }
}

/// What the simulated worker does for a step, chosen by session name.
#[derive(Debug, Clone)]
pub enum WorkerScript {
    /// Report completion with `<name>-output`.
    Complete,
    /// Report failure with the given message.
    Fail(String),
    /// Never report anything.
    Ignore,
}

/// Background task that plays every worker: watches the backend for new
/// launches and reports the scripted outcome for each. Abort the returned
/// handle when the test is done.
pub fn spawn_worker_sim(
    pool: SessionPool,
    backend: Arc<StubBackend>,
    script: impl Fn(&str) -> WorkerScript + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut seen: HashSet<SessionId> = HashSet::new();
        loop {
            let pending: Vec<LaunchRecord> = backend
                .launches()
                .into_iter()
                .filter(|l| !seen.contains(&l.session_id))
                .collect();
            for launch in pending {
                seen.insert(launch.session_id);
                match script(&launch.name) {
                    WorkerScript::Complete => {
                        let output = format!("{}-output", launch.name);
                        let _ = pool.report_completed(launch.session_id, Some(output)).await;
                    }
                    WorkerScript::Fail(message) => {
                        let _ = pool.report_failed(launch.session_id, message).await;
                    }
                    WorkerScript::Ignore => {}
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}
