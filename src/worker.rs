//! Worker backend seam.
//!
//! The mechanics of how a dispatched prompt becomes actual agent work are
//! external to the pool: the pool only requires that a worker can be
//! launched, asked to stop, and force-killed. Status transitions travel the
//! other way, through `SessionPool::report_*`.

use crate::agent::Agent;
use crate::error::{Error, Result};
use crate::orchestration::pool::SessionPool;
use crate::session::{Session, SessionId, SessionStatus};
use crate::{flog_debug, flog_warn};
use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The pool's contract with the worker mechanism.
///
/// `launch` must either start a worker for the session or fail without side
/// effects. `signal_abort` requests cooperative termination and must not
/// block; `force_kill` is the grace-period fallback and must not fail loudly.
pub trait WorkerBackend: Send + Sync {
    fn launch(&self, session: &Session, prompt: &str) -> Result<()>;
    fn signal_abort(&self, id: SessionId);
    fn force_kill(&self, id: SessionId);
}

/// Backend that runs the configured agent command as a child process.
pub struct ProcessBackend {
    agent: Agent,
    children: Mutex<HashMap<SessionId, Child>>,
}

impl ProcessBackend {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent,
            children: Mutex::new(HashMap::new()),
        }
    }

    fn children(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Child>> {
        self.children
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Watch worker processes and report their exits back to the pool.
    ///
    /// This is the status-reporting half of the backend's contract: each
    /// tick, every live session's child is polled with `try_reap`, and an
    /// exited child settles the session — `Aborting` sessions as aborted,
    /// otherwise completed or failed by exit status. Runs until the returned
    /// handle is aborted.
    pub fn spawn_reaper(
        self: Arc<Self>,
        pool: SessionPool,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                for session in pool.sessions().await {
                    let Some(success) = self.try_reap(session.id) else {
                        continue;
                    };
                    let result = match (session.status, success) {
                        (SessionStatus::Aborting, _) => pool.report_aborted(session.id).await,
                        (_, true) => pool.report_completed(session.id, None).await,
                        (_, false) => {
                            pool.report_failed(
                                session.id,
                                "worker exited with a failure status".to_string(),
                            )
                            .await
                        }
                    };
                    if let Err(e) = result {
                        // Raced a control operation between the roster
                        // snapshot and the report; the child is already
                        // reaped, so settle against the current status.
                        if pool.status(session.id).await == Some(SessionStatus::Aborting) {
                            let _ = pool.report_aborted(session.id).await;
                        } else {
                            flog_warn!(
                                "Could not settle session {} after worker exit: {}",
                                session.id.short(),
                                e
                            );
                        }
                    }
                }
                tokio::time::sleep(interval).await;
            }
        })
    }

    /// Check whether the worker process for a session has exited, reaping it
    /// if so. Returns the exit success flag, or None while still running or
    /// when the session is unknown.
    pub fn try_reap(&self, id: SessionId) -> Option<bool> {
        let mut children = self.children();
        let child = children.get_mut(&id)?;
        match child.try_wait() {
            Ok(Some(status)) => {
                children.remove(&id);
                Some(status.success())
            }
            Ok(None) => None,
            Err(e) => {
                flog_warn!("try_wait failed for session {}: {}", id.short(), e);
                children.remove(&id);
                Some(false)
            }
        }
    }
}

impl WorkerBackend for ProcessBackend {
    fn launch(&self, session: &Session, prompt: &str) -> Result<()> {
        if !self.agent.is_available() {
            return Err(Error::AgentNotAvailable(self.agent.binary().to_string()));
        }

        let cmd = self
            .agent
            .command(prompt, session.model.as_deref(), session.thinking_level);
        flog_debug!(
            "ProcessBackend::launch session={} cwd={} cmd={:?}",
            session.id.short(),
            session.cwd.display(),
            cmd.first()
        );

        let child = Command::new(&cmd[0])
            .args(&cmd[1..])
            .current_dir(&session.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Spawn(format!("failed to start worker: {}", e)))?;

        self.children().insert(session.id, child);
        Ok(())
    }

    fn signal_abort(&self, id: SessionId) {
        // Cooperative stop; a plain kill is the best a bare process offers.
        if let Some(child) = self.children().get_mut(&id) {
            if let Err(e) = child.kill() {
                flog_warn!("abort signal for session {} failed: {}", id.short(), e);
            }
        }
    }

    fn force_kill(&self, id: SessionId) {
        if let Some(mut child) = self.children().remove(&id) {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
