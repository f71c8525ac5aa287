//! Workflow engine: dependency-ordered execution of workflow steps.
//!
//! The engine walks a workflow's step graph, dispatching every step whose
//! dependencies have succeeded into the session pool as a worker session,
//! and consuming pool events to settle steps as they finish. Failures
//! propagate as skips through the dependency graph rather than tearing
//! down sibling branches.

use crate::error::{Error, Result};
use crate::orchestration::pool::{SessionEvent, SessionPool};
use crate::session::{SessionId, SpawnConfig};
use crate::workflow::{template, StepGraph, StepSpec, WorkflowRegistry};
use crate::{flog, flog_debug, flog_warn};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Terminal outcome of a single step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The step's session completed; `output` is whatever the worker
    /// reported (fed into dependents as `<step_id>.output`).
    Succeeded {
        session_id: SessionId,
        output: Option<String>,
    },
    /// The step's session failed or was aborted.
    Failed { reason: String },
    /// The step never ran because an upstream step did not succeed.
    Skipped { reason: String },
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }
}

/// Result of a full workflow run: one outcome per step.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub workflow_id: String,
    pub outcomes: HashMap<String, StepOutcome>,
    /// True when the run ended by cancellation rather than settling
    /// every step on its own.
    pub cancelled: bool,
}

impl RunResult {
    /// True when every step succeeded.
    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.outcomes.values().all(StepOutcome::succeeded)
    }

    pub fn outcome(&self, step_id: &str) -> Option<&StepOutcome> {
        self.outcomes.get(step_id)
    }
}

/// Executes workflows against a session pool.
pub struct WorkflowEngine {
    registry: WorkflowRegistry,
    pool: SessionPool,
    /// Working directory handed to spawned sessions.
    cwd: PathBuf,
}

/// Mutable bookkeeping for one run.
struct RunState {
    /// Steps with a terminal outcome.
    outcomes: HashMap<String, StepOutcome>,
    /// Subset of settled steps that succeeded.
    succeeded: HashSet<String>,
    /// All settled steps (succeeded, failed, or skipped).
    settled: HashSet<String>,
    /// Steps currently running, keyed by their session id.
    running: HashMap<SessionId, String>,
    /// Variable map for template resolution, grows with step outputs.
    variables: HashMap<String, String>,
}

impl RunState {
    fn new(variables: HashMap<String, String>) -> Self {
        Self {
            outcomes: HashMap::new(),
            succeeded: HashSet::new(),
            settled: HashSet::new(),
            running: HashMap::new(),
            variables,
        }
    }

    fn settle(&mut self, step_id: &str, outcome: StepOutcome) {
        if outcome.succeeded() {
            self.succeeded.insert(step_id.to_string());
        }
        self.settled.insert(step_id.to_string());
        self.outcomes.insert(step_id.to_string(), outcome);
    }
}

impl WorkflowEngine {
    pub fn new(registry: WorkflowRegistry, pool: SessionPool, cwd: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            pool,
            cwd: cwd.into(),
        }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Run a registered workflow to completion.
    ///
    /// `events` must be the receiving end of the pool's event channel; the
    /// engine consumes it for the duration of the run. `cancel` cancels the
    /// run: running sessions get an abort request and every unsettled step
    /// settles as skipped.
    ///
    /// # Errors
    ///
    /// `Error::WorkflowNotFound` for unknown ids. Step failures do not fail
    /// the run; they are reported per step in the `RunResult`.
    pub async fn run(
        &self,
        workflow_id: &str,
        variables: HashMap<String, String>,
        events: &mut mpsc::Receiver<SessionEvent>,
        cancel: CancellationToken,
    ) -> Result<RunResult> {
        let definition = self.registry.get(workflow_id)?;
        let graph = StepGraph::from_definition(definition)?;
        let total = definition.steps.len();

        flog!("Workflow '{}' starting ({} steps)", workflow_id, total);
        let mut state = RunState::new(variables);

        while state.settled.len() < total {
            self.dispatch_ready(&graph, &mut state).await;

            // Dispatch settled steps without launching anything; loop again
            // for their dependents before blocking on events.
            if state.settled.len() >= total {
                break;
            }

            if state.running.is_empty() {
                // Nothing running and nothing became ready: remaining steps
                // are unreachable. This cannot happen for a validated acyclic
                // graph unless dispatch itself failed every candidate.
                let remaining: Vec<String> = graph
                    .step_ids()
                    .into_iter()
                    .filter(|id| !state.settled.contains(id))
                    .collect();
                if !remaining.is_empty()
                    && graph
                        .ready_steps(&state.succeeded, &state.settled)
                        .is_empty()
                {
                    for id in remaining {
                        flog_warn!("Workflow '{}': step '{}' unreachable", workflow_id, id);
                        state.settle(
                            &id,
                            StepOutcome::Skipped {
                                reason: "no runnable path to this step".to_string(),
                            },
                        );
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(self.cancel_run(workflow_id, &graph, state).await);
                }
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(&graph, &mut state, event),
                        // Pool dropped; treat as cancellation.
                        None => return Ok(self.cancel_run(workflow_id, &graph, state).await),
                    }
                }
            }
        }

        let succeeded = state.succeeded.len();
        flog!(
            "Workflow '{}' finished: {}/{} steps succeeded",
            workflow_id,
            succeeded,
            total
        );
        Ok(RunResult {
            workflow_id: workflow_id.to_string(),
            outcomes: state.outcomes,
            cancelled: false,
        })
    }

    /// Launch every step whose dependencies have all succeeded.
    async fn dispatch_ready(&self, graph: &StepGraph, state: &mut RunState) {
        let ready: Vec<StepSpec> = graph
            .ready_steps(&state.succeeded, &state.settled)
            .into_iter()
            .filter(|step| !state.running.values().any(|running| running == &step.id))
            .cloned()
            .collect();

        for step in ready {
            let step_id = step.id.clone();
            if !self.pool.has_capacity().await {
                // Leave the step for a later pass once a session frees up.
                flog_debug!("Pool at capacity, deferring step '{}'", step_id);
                break;
            }

            let prompt = match template::resolve(&step.prompt, &state.variables) {
                Ok(prompt) => prompt,
                Err(e) => {
                    flog_warn!("Step '{}' prompt resolution failed: {}", step_id, e);
                    state.settle(&step_id, StepOutcome::Failed {
                        reason: e.to_string(),
                    });
                    self.skip_dependents(graph, state, &step_id);
                    continue;
                }
            };

            let config = SpawnConfig::new(&self.cwd, &step.name);
            match self.pool.spawn(config, &prompt).await {
                Ok((session, _handle)) => {
                    flog_debug!(
                        "Step '{}' dispatched as session {}",
                        step_id,
                        session.id.short()
                    );
                    state.running.insert(session.id, step_id);
                }
                Err(Error::PoolFull { .. }) => {
                    // Raced another spawner for the last slot; retry later.
                    break;
                }
                Err(e) => {
                    flog_warn!("Step '{}' spawn failed: {}", step_id, e);
                    state.settle(&step_id, StepOutcome::Failed {
                        reason: e.to_string(),
                    });
                    self.skip_dependents(graph, state, &step_id);
                }
            }
        }
    }

    fn handle_event(&self, graph: &StepGraph, state: &mut RunState, event: SessionEvent) {
        match event {
            SessionEvent::Completed { session_id, output } => {
                let Some(step_id) = state.running.remove(&session_id) else {
                    return;
                };
                if let Some(output) = &output {
                    state
                        .variables
                        .insert(format!("{step_id}.output"), output.clone());
                }
                flog!("Step '{}' succeeded", step_id);
                state.settle(&step_id, StepOutcome::Succeeded { session_id, output });
            }
            SessionEvent::Failed { session_id, error } => {
                let Some(step_id) = state.running.remove(&session_id) else {
                    return;
                };
                flog_warn!("Step '{}' failed: {}", step_id, error);
                state.settle(&step_id, StepOutcome::Failed { reason: error });
                self.skip_dependents(graph, state, &step_id);
            }
            SessionEvent::Aborted { session_id } => {
                let Some(step_id) = state.running.remove(&session_id) else {
                    return;
                };
                flog_warn!("Step '{}' aborted", step_id);
                state.settle(&step_id, StepOutcome::Failed {
                    reason: "session aborted".to_string(),
                });
                self.skip_dependents(graph, state, &step_id);
            }
            // Spawned / StatusChanged carry no settlement information.
            SessionEvent::Spawned { .. } | SessionEvent::StatusChanged { .. } => {}
        }
    }

    /// Settle every transitive dependent of a non-succeeded step as skipped,
    /// naming the upstream step that caused it.
    fn skip_dependents(&self, graph: &StepGraph, state: &mut RunState, failed_step: &str) {
        let mut frontier = vec![failed_step.to_string()];
        while let Some(step_id) = frontier.pop() {
            let dependents: Vec<String> =
                graph.dependents(&step_id).iter().map(|s| s.id.clone()).collect();
            for dep_id in dependents {
                if state.settled.contains(&dep_id) {
                    continue;
                }
                flog_debug!(
                    "Step '{}' skipped (upstream '{}' did not succeed)",
                    dep_id,
                    failed_step
                );
                state.settle(
                    &dep_id,
                    StepOutcome::Skipped {
                        reason: format!("dependency '{failed_step}' did not succeed"),
                    },
                );
                frontier.push(dep_id);
            }
        }
    }

    /// Abort running sessions and settle everything unsettled as skipped.
    async fn cancel_run(
        &self,
        workflow_id: &str,
        graph: &StepGraph,
        mut state: RunState,
    ) -> RunResult {
        flog!("Workflow '{}' cancelled", workflow_id);
        for (&session_id, step_id) in &state.running {
            flog_debug!(
                "Aborting session {} for step '{}'",
                session_id.short(),
                step_id
            );
            self.pool.abort(session_id).await;
        }
        let running: Vec<String> = state.running.drain().map(|(_, step)| step).collect();
        for step_id in running {
            state.settle(&step_id, StepOutcome::Failed {
                reason: "run cancelled".to_string(),
            });
        }
        for step_id in graph.step_ids() {
            if !state.settled.contains(&step_id) {
                state.settle(&step_id, StepOutcome::Skipped {
                    reason: "run cancelled".to_string(),
                });
            }
        }
        RunResult {
            workflow_id: workflow_id.to_string(),
            outcomes: state.outcomes,
            cancelled: true,
        }
    }
}
