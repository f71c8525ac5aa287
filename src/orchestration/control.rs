//! Control surface: ad-hoc user commands against the session pool.
//!
//! Commands form a closed set of tagged descriptors. Visibility is a pure
//! predicate over a context snapshot so the command set can be computed
//! without touching the pool; execution borrows the pool and the caller's
//! interaction primitives from the same context.

use crate::error::{Error, Result};
use crate::orchestration::pool::SessionPool;
use crate::session::{Session, SessionId, SessionStatus, SpawnConfig};
use crate::{flog, flog_warn};
use std::future::Future;
use std::path::PathBuf;

/// User-interaction primitives consumed, never owned, by command execution.
pub trait Interaction: Send + Sync {
    /// Ask the user for a line of input; `None` means cancelled.
    fn prompt_input(&self, prompt: &str) -> Option<String>;

    /// Surface a message to the user.
    fn notify(&self, message: &str);
}

/// An issue selected by the user, with the sessions linked to it.
#[derive(Debug, Clone)]
pub struct IssueContext {
    pub id: String,
    pub title: String,
    pub linked_sessions: Vec<SessionId>,
}

/// Everything a command needs: a snapshot of pool state for visibility
/// decisions plus borrowed collaborators for execution.
pub struct ControlContext<'a> {
    /// Snapshot of the current roster (not dismissed sessions).
    pub sessions: Vec<Session>,
    /// Session the user currently has selected, if any.
    pub selected: Option<SessionId>,
    /// Issue the user currently has selected, if any.
    pub issue: Option<IssueContext>,
    /// Whether the pool could accept another spawn at snapshot time.
    pub has_capacity: bool,
    pub cwd: PathBuf,
    pub pool: &'a SessionPool,
    pub interaction: &'a dyn Interaction,
}

impl ControlContext<'_> {
    fn selected_session(&self) -> Option<&Session> {
        let id = self.selected?;
        self.sessions.iter().find(|s| s.id == id)
    }

    fn approval_sessions(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Approval)
            .map(|s| s.id)
            .collect()
    }
}

/// Static metadata for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub id: &'static str,
    pub label: &'static str,
    pub category: &'static str,
    pub description: &'static str,
}

/// The closed set of user-invokable control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    SpawnSession,
    AbortSession,
    ApproveSession,
    DismissSession,
    ApproveAll,
    ShutdownAll,
}

impl ControlCommand {
    pub const ALL: [ControlCommand; 6] = [
        ControlCommand::SpawnSession,
        ControlCommand::AbortSession,
        ControlCommand::ApproveSession,
        ControlCommand::DismissSession,
        ControlCommand::ApproveAll,
        ControlCommand::ShutdownAll,
    ];

    pub fn descriptor(self) -> CommandDescriptor {
        match self {
            ControlCommand::SpawnSession => CommandDescriptor {
                id: "session.spawn",
                label: "Spawn Session",
                category: "session",
                description: "Start a new worker session from a prompt",
            },
            ControlCommand::AbortSession => CommandDescriptor {
                id: "session.abort",
                label: "Abort Session",
                category: "session",
                description: "Request termination of the selected session",
            },
            ControlCommand::ApproveSession => CommandDescriptor {
                id: "session.approve",
                label: "Approve Session",
                category: "session",
                description: "Resume the selected session waiting for approval",
            },
            ControlCommand::DismissSession => CommandDescriptor {
                id: "session.dismiss",
                label: "Dismiss Session",
                category: "session",
                description: "Hide the selected session from active views",
            },
            ControlCommand::ApproveAll => CommandDescriptor {
                id: "pool.approve_all",
                label: "Approve All",
                category: "pool",
                description: "Approve every session waiting for approval",
            },
            ControlCommand::ShutdownAll => CommandDescriptor {
                id: "pool.shutdown_all",
                label: "Shutdown All",
                category: "pool",
                description: "Terminate every active session",
            },
        }
    }

    /// Whether this command should be offered for the given context.
    ///
    /// Pure over the context's snapshot fields; never touches the pool.
    pub fn is_visible(self, ctx: &ControlContext<'_>) -> bool {
        match self {
            ControlCommand::SpawnSession => ctx.has_capacity,
            ControlCommand::AbortSession => ctx
                .selected_session()
                .map(|s| !s.status.is_terminal() && s.status != SessionStatus::Aborting)
                .unwrap_or(false),
            ControlCommand::ApproveSession | ControlCommand::DismissSession => ctx
                .selected_session()
                .map(|s| s.status == SessionStatus::Approval)
                .unwrap_or(false),
            ControlCommand::ApproveAll => !ctx.approval_sessions().is_empty(),
            ControlCommand::ShutdownAll => !ctx.sessions.is_empty(),
        }
    }

    /// Execute the command against the context's pool.
    ///
    /// Single-target commands surface the first error directly. Bulk
    /// commands fan out best-effort and report counts via notification
    /// instead of raising on partial failure.
    pub async fn execute(self, ctx: &ControlContext<'_>) -> Result<()> {
        match self {
            ControlCommand::SpawnSession => spawn_session(ctx).await,
            ControlCommand::AbortSession => {
                let id = require_selected(ctx)?;
                ctx.pool.abort(id).await;
                Ok(())
            }
            ControlCommand::ApproveSession => {
                let id = require_selected(ctx)?;
                ctx.pool.approve(id).await
            }
            ControlCommand::DismissSession => {
                let id = require_selected(ctx)?;
                ctx.pool.dismiss(id, "approval_needed").await;
                Ok(())
            }
            ControlCommand::ApproveAll => approve_all(ctx).await,
            ControlCommand::ShutdownAll => {
                let report = ctx.pool.shutdown_all().await;
                if report.clean() {
                    ctx.interaction
                        .notify(&format!("{} sessions terminated", report.terminated.len()));
                } else {
                    ctx.interaction.notify(&format!(
                        "{} sessions terminated, {} force-killed",
                        report.terminated.len(),
                        report.failed.len()
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Commands visible for a context, in declaration order.
pub fn visible_commands(ctx: &ControlContext<'_>) -> Vec<ControlCommand> {
    ControlCommand::ALL
        .iter()
        .copied()
        .filter(|cmd| cmd.is_visible(ctx))
        .collect()
}

fn require_selected(ctx: &ControlContext<'_>) -> Result<SessionId> {
    ctx.selected
        .ok_or_else(|| Error::Validation("no session selected".to_string()))
}

async fn spawn_session(ctx: &ControlContext<'_>) -> Result<()> {
    let Some(prompt) = ctx.interaction.prompt_input("Prompt") else {
        return Ok(());
    };

    let name = match &ctx.issue {
        Some(issue) => format!("{}-worker", issue.id),
        None => "adhoc".to_string(),
    };
    let config = SpawnConfig::new(&ctx.cwd, &name);

    match ctx.pool.spawn(config, &prompt).await {
        Ok((session, _handle)) => {
            ctx.interaction
                .notify(&format!("Spawned session '{}'", session.name));
            Ok(())
        }
        Err(e) => {
            flog_warn!("Spawn command failed: {}", e);
            ctx.interaction.notify(&format!("Spawn failed: {e}"));
            Err(e)
        }
    }
}

async fn approve_all(ctx: &ControlContext<'_>) -> Result<()> {
    let targets = ctx.pool.pending_approval().await;
    let ids: Vec<SessionId> = targets.iter().map(|s| s.id).collect();
    if ids.is_empty() {
        return Err(Error::Validation(
            "no sessions awaiting approval".to_string(),
        ));
    }

    let total = ids.len();
    let report = apply_to_all(ids, |id| ctx.pool.approve(id)).await;
    flog!(
        "Approve-all: {}/{} sessions approved",
        report.succeeded.len(),
        total
    );
    ctx.interaction.notify(&format!(
        "Approved {} of {} sessions",
        report.succeeded.len(),
        total
    ));
    Ok(())
}

/// Per-target outcome of a bulk operation.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<SessionId>,
    pub failed: Vec<(SessionId, String)>,
}

/// Apply an operation to every target independently.
///
/// A failing target lands in `failed` with its error text; the remaining
/// targets are still attempted. Never returns early.
pub async fn apply_to_all<F, Fut>(targets: Vec<SessionId>, op: F) -> BatchReport
where
    F: Fn(SessionId) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut report = BatchReport::default();
    for id in targets {
        match op(id).await {
            Ok(()) => report.succeeded.push(id),
            Err(e) => report.failed.push((id, e.to_string())),
        }
    }
    report
}
