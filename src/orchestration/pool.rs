//! Session pool for multi-worker management.
//!
//! The `SessionPool` owns the session roster, enforces the capacity limit,
//! validates every status transition against the session state machine, and
//! emits events for status changes via a channel. Handles issued by the pool
//! are the only way other components control a session.

use crate::error::{Error, Result};
use crate::session::{Session, SessionId, SessionStatus, SpawnConfig};
use crate::worker::WorkerBackend;
use crate::{flog, flog_debug, flog_warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

/// How often `shutdown_all` re-checks the roster while waiting out the
/// grace period.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Events emitted by the session pool for lifecycle changes.
///
/// These events allow external components (the engine, a UI) to react to
/// session lifecycle changes without polling.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session finished worker initialization and started working.
    Spawned {
        session_id: SessionId,
        name: String,
    },
    /// A session moved to a new non-terminal status.
    StatusChanged {
        session_id: SessionId,
        status: SessionStatus,
    },
    /// A session completed successfully.
    Completed {
        session_id: SessionId,
        /// Output reference reported by the worker, if any.
        output: Option<String>,
    },
    /// A session failed.
    Failed {
        session_id: SessionId,
        error: String,
    },
    /// A session terminated after an abort request.
    Aborted { session_id: SessionId },
}

/// Outcome of `shutdown_all`.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Sessions that reached a terminal state within the grace period.
    pub terminated: Vec<SessionId>,
    /// Sessions that had to be force-killed after the grace period.
    pub failed: Vec<SessionId>,
}

impl ShutdownReport {
    pub fn clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct Roster {
    sessions: HashMap<SessionId, Session>,
    /// Ids dismissed from active views; visibility bookkeeping only.
    dismissed: HashSet<SessionId>,
}

/// Manages the roster of concurrent worker sessions.
///
/// Cloning the pool clones the shared handle; all clones see one roster.
/// Roster insertion and removal are linearized behind a single `RwLock`, so
/// a stale handle can never resurrect a removed session.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<RwLock<Roster>>,
    backend: Arc<dyn WorkerBackend>,
    event_tx: mpsc::Sender<SessionEvent>,
    max_sessions: usize,
    grace_period: Duration,
}

impl SessionPool {
    /// Create a new session pool.
    ///
    /// # Arguments
    ///
    /// * `max_sessions` - Maximum number of concurrently active sessions
    /// * `grace_period` - Bounded wait in `shutdown_all` before force-kill
    /// * `backend` - Worker launch/termination mechanism
    /// * `event_tx` - Channel sender for emitting session events
    pub fn new(
        max_sessions: usize,
        grace_period: Duration,
        backend: Arc<dyn WorkerBackend>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Roster::default())),
            backend,
            event_tx,
            max_sessions,
            grace_period,
        }
    }

    /// Spawn a new session for a prompt.
    ///
    /// Atomically checks capacity and inserts a `Spawning` roster entry,
    /// then launches the worker. On launch failure the entry is removed and
    /// no session is added to the roster.
    ///
    /// # Errors
    ///
    /// `Error::PoolFull` past the concurrency limit; `Error::Spawn` (or the
    /// backend's error) when worker initialization fails.
    pub async fn spawn(
        &self,
        config: SpawnConfig,
        prompt: &str,
    ) -> Result<(Session, SessionHandle)> {
        let session = {
            let mut roster = self.inner.write().await;
            if roster.sessions.len() >= self.max_sessions {
                return Err(Error::PoolFull {
                    max: self.max_sessions,
                });
            }
            let session = Session::new(config);
            roster.sessions.insert(session.id, session.clone());
            session
        };

        flog_debug!(
            "SessionPool::spawn id={} name={} cwd={}",
            session.id.short(),
            session.name,
            session.cwd.display()
        );

        if let Err(e) = self.backend.launch(&session, prompt) {
            let mut roster = self.inner.write().await;
            roster.sessions.remove(&session.id);
            flog_warn!("Worker launch failed for '{}': {}", session.name, e);
            return Err(e);
        }

        let session = {
            let mut roster = self.inner.write().await;
            match roster.sessions.get_mut(&session.id) {
                Some(entry) => {
                    entry.status = SessionStatus::Working;
                    entry.touch();
                    entry.clone()
                }
                // Removed concurrently (e.g. shutdown raced the launch).
                None => return Err(Error::SessionNotFound(session.id)),
            }
        };

        flog!("Session spawned: {} ({})", session.name, session.id.short());
        let _ = self
            .event_tx
            .send(SessionEvent::Spawned {
                session_id: session.id,
                name: session.name.clone(),
            })
            .await;

        let handle = SessionHandle {
            id: session.id,
            pool: self.clone(),
        };
        Ok((session, handle))
    }

    /// Get a control handle for a live session.
    ///
    /// Returns `None` for unknown or already-terminal ids; absence is a safe
    /// no-op signal, not an error.
    pub async fn get_handle(&self, id: SessionId) -> Option<SessionHandle> {
        let roster = self.inner.read().await;
        roster.sessions.get(&id).map(|_| SessionHandle {
            id,
            pool: self.clone(),
        })
    }

    /// Current status of a session, `None` once removed from the roster.
    pub async fn status(&self, id: SessionId) -> Option<SessionStatus> {
        let roster = self.inner.read().await;
        roster.sessions.get(&id).map(|s| s.status)
    }

    /// Snapshot of all sessions in the roster.
    pub async fn sessions(&self) -> Vec<Session> {
        let roster = self.inner.read().await;
        roster.sessions.values().cloned().collect()
    }

    /// Snapshot of sessions not dismissed from active views.
    pub async fn active_sessions(&self) -> Vec<Session> {
        let roster = self.inner.read().await;
        roster
            .sessions
            .values()
            .filter(|s| !roster.dismissed.contains(&s.id))
            .cloned()
            .collect()
    }

    /// Sessions currently waiting for approval and not dismissed.
    pub async fn pending_approval(&self) -> Vec<Session> {
        let roster = self.inner.read().await;
        roster
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Approval && !roster.dismissed.contains(&s.id))
            .cloned()
            .collect()
    }

    pub async fn active_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn has_capacity(&self) -> bool {
        self.active_count().await < self.max_sessions
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Dismiss a session from active views.
    ///
    /// This is a visibility transition, not termination: the session stays
    /// in the roster, its handle stays valid, and the worker's own lifecycle
    /// is untouched. Unknown ids are a no-op.
    pub async fn dismiss(&self, id: SessionId, reason: &str) {
        let mut roster = self.inner.write().await;
        if roster.sessions.contains_key(&id) {
            flog_debug!("Session {} dismissed ({})", id.short(), reason);
            roster.dismissed.insert(id);
        }
    }

    /// Request cooperative termination of a session.
    ///
    /// Idempotent: aborting, terminal, and unknown sessions are a no-op.
    /// Does not block for confirmation; the outcome arrives later as a
    /// status report.
    pub async fn abort(&self, id: SessionId) {
        let signal = {
            let mut roster = self.inner.write().await;
            match roster.sessions.get_mut(&id) {
                Some(s)
                    if !s.status.is_terminal() && s.status != SessionStatus::Aborting =>
                {
                    s.status = SessionStatus::Aborting;
                    s.touch();
                    true
                }
                _ => false,
            }
        };

        if signal {
            flog!("Abort requested for session {}", id.short());
            self.backend.signal_abort(id);
            let _ = self
                .event_tx
                .send(SessionEvent::StatusChanged {
                    session_id: id,
                    status: SessionStatus::Aborting,
                })
                .await;
        }
    }

    /// Resume a session blocked in `Approval` status.
    ///
    /// # Errors
    /// `Error::SessionNotFound` for unknown ids; `Error::InvalidState` when
    /// the session is not in `Approval`. The session is unchanged on failure.
    pub async fn approve(&self, id: SessionId) -> Result<()> {
        {
            let mut roster = self.inner.write().await;
            let session = roster
                .sessions
                .get_mut(&id)
                .ok_or(Error::SessionNotFound(id))?;
            if session.status != SessionStatus::Approval {
                return Err(Error::InvalidState {
                    session: id,
                    status: session.status,
                    expected: "approval",
                });
            }
            session.status = SessionStatus::Working;
            session.touch();
        }

        flog!("Session {} approved", id.short());
        let _ = self
            .event_tx
            .send(SessionEvent::StatusChanged {
                session_id: id,
                status: SessionStatus::Working,
            })
            .await;
        Ok(())
    }

    /// Apply a worker-reported non-terminal status transition.
    ///
    /// # Errors
    /// `Error::SessionNotFound` for unknown ids; `Error::InvalidTransition`
    /// when the transition is absent from the state machine's table.
    pub async fn report_status(&self, id: SessionId, status: SessionStatus) -> Result<()> {
        if status.is_terminal() {
            // Terminal reports go through the dedicated paths so the roster
            // removal and event payloads stay consistent.
            return match status {
                SessionStatus::Completed => self.report_completed(id, None).await,
                SessionStatus::Failed => self.report_failed(id, "worker failed".to_string()).await,
                _ => self.report_aborted(id).await,
            };
        }

        self.transition(id, status).await?;
        let _ = self
            .event_tx
            .send(SessionEvent::StatusChanged {
                session_id: id,
                status,
            })
            .await;
        Ok(())
    }

    /// Record a successful completion reported by the worker.
    pub async fn report_completed(&self, id: SessionId, output: Option<String>) -> Result<()> {
        self.transition(id, SessionStatus::Completed).await?;
        self.remove(id).await;
        flog!("Session {} completed", id.short());
        let _ = self
            .event_tx
            .send(SessionEvent::Completed {
                session_id: id,
                output,
            })
            .await;
        Ok(())
    }

    /// Record a failure reported by the worker.
    pub async fn report_failed(&self, id: SessionId, error: String) -> Result<()> {
        self.transition(id, SessionStatus::Failed).await?;
        self.remove(id).await;
        flog_warn!("Session {} failed: {}", id.short(), error);
        let _ = self
            .event_tx
            .send(SessionEvent::Failed {
                session_id: id,
                error,
            })
            .await;
        Ok(())
    }

    /// Record that a worker terminated after an abort request.
    pub async fn report_aborted(&self, id: SessionId) -> Result<()> {
        self.transition(id, SessionStatus::Aborted).await?;
        self.remove(id).await;
        flog!("Session {} aborted", id.short());
        let _ = self
            .event_tx
            .send(SessionEvent::Aborted { session_id: id })
            .await;
        Ok(())
    }

    /// Request cooperative termination of every active session, wait out the
    /// grace period, then force-terminate stragglers.
    ///
    /// Always returns; sessions that failed to terminate cleanly are listed
    /// in the report's `failed` field but the shutdown still completes.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        let ids: Vec<SessionId> = {
            let roster = self.inner.read().await;
            roster.sessions.keys().copied().collect()
        };
        if ids.is_empty() {
            return ShutdownReport::default();
        }

        flog!("Shutting down {} sessions", ids.len());
        for &id in &ids {
            self.abort(id).await;
        }

        // Wait out the grace period for terminal reports to empty the roster.
        let deadline = Instant::now() + self.grace_period;
        loop {
            if self.inner.read().await.sessions.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        let stragglers: Vec<SessionId> = {
            let roster = self.inner.read().await;
            ids.iter()
                .copied()
                .filter(|id| roster.sessions.contains_key(id))
                .collect()
        };

        for &id in &stragglers {
            flog_warn!(
                "Session {} did not terminate within grace period, force-killing",
                id.short()
            );
            self.backend.force_kill(id);
            self.remove(id).await;
            let _ = self
                .event_tx
                .send(SessionEvent::Aborted { session_id: id })
                .await;
        }

        let terminated = ids
            .into_iter()
            .filter(|id| !stragglers.contains(id))
            .collect();
        ShutdownReport {
            terminated,
            failed: stragglers,
        }
    }

    async fn transition(&self, id: SessionId, to: SessionStatus) -> Result<()> {
        let mut roster = self.inner.write().await;
        let session = roster
            .sessions
            .get_mut(&id)
            .ok_or(Error::SessionNotFound(id))?;
        if !session.status.can_transition(to) {
            return Err(Error::InvalidTransition {
                from: session.status,
                to,
            });
        }
        session.status = to;
        session.touch();
        Ok(())
    }

    async fn remove(&self, id: SessionId) {
        let mut roster = self.inner.write().await;
        roster.sessions.remove(&id);
        roster.dismissed.remove(&id);
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("max_sessions", &self.max_sessions)
            .field("grace_period", &self.grace_period)
            .finish()
    }
}

/// A control capability bound to exactly one session.
///
/// The handle stays usable for the session's lifetime; once the session
/// reaches a terminal state its operations degrade to the pool's defined
/// no-op/InvalidState semantics, and the pool never re-issues a handle for
/// the dead id (a new spawn yields a new id).
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    pool: SessionPool,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Request cooperative termination of the bound session.
    ///
    /// Idempotent and non-blocking; the outcome arrives via status events.
    pub async fn send_abort(&self) {
        self.pool.abort(self.id).await;
    }

    /// Resume the bound session if it is blocked in `Approval` status.
    pub async fn send_approval(&self) -> Result<()> {
        self.pool.approve(self.id).await
    }

    /// Current status snapshot, `None` once the session is removed.
    pub async fn status(&self) -> Option<SessionStatus> {
        self.pool.status(self.id).await
    }
}
