//! Session data model and the status state machine.
//!
//! A session is one unit of worker execution bound to a dispatched prompt.
//! Its status is a closed enumeration with an explicit transition table;
//! transitions absent from the table are rejected rather than written ad-hoc.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for a session, assigned by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Session status in its lifecycle.
///
/// Transitions are driven by worker-reported events and by control
/// operations (abort, approve). `Aborted`, `Completed` and `Failed` are
/// terminal; a terminal session is removed from the pool roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Worker initialization in progress.
    Spawning,
    /// Worker is actively executing.
    Working,
    /// Worker is alive but has no work in flight.
    Idle,
    /// Worker is blocked waiting for user approval.
    Approval,
    /// Cooperative termination has been requested.
    Aborting,
    /// Worker terminated after an abort request.
    Aborted,
    /// Worker finished its work successfully.
    Completed,
    /// Worker failed.
    Failed,
}

impl SessionStatus {
    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Aborted | SessionStatus::Completed | SessionStatus::Failed
        )
    }

    /// The explicit transition table.
    ///
    /// Any (from, to) pair not listed here is invalid and must be rejected.
    pub fn can_transition(&self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, to) {
            (Spawning, Working) | (Spawning, Aborting) | (Spawning, Failed) => true,
            (Working, Idle)
            | (Working, Approval)
            | (Working, Aborting)
            | (Working, Completed)
            | (Working, Failed) => true,
            (Idle, Working) | (Idle, Aborting) | (Idle, Completed) | (Idle, Failed) => true,
            (Approval, Working) | (Approval, Aborting) | (Approval, Failed) => true,
            (Aborting, Aborted) | (Aborting, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Spawning => write!(f, "spawning"),
            SessionStatus::Working => write!(f, "working"),
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Approval => write!(f, "approval"),
            SessionStatus::Aborting => write!(f, "aborting"),
            SessionStatus::Aborted => write!(f, "aborted"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Reasoning effort requested from the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingLevel::Low => "low",
            ThinkingLevel::Medium => "medium",
            ThinkingLevel::High => "high",
        }
    }
}

impl std::fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input to `SessionPool::spawn`.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Working directory the worker runs in.
    pub cwd: PathBuf,
    /// Human-readable session name.
    pub name: String,
    /// Optional model override.
    pub model: Option<String>,
    /// Optional thinking-level override.
    pub thinking_level: Option<ThinkingLevel>,
}

impl SpawnConfig {
    pub fn new(cwd: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            name: name.into(),
            model: None,
            thinking_level: None,
        }
    }
}

/// A session tracked by the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub status: SessionStatus,
    pub cwd: PathBuf,
    pub model: Option<String>,
    pub thinking_level: Option<ThinkingLevel>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    /// Create a new session record in `Spawning` status.
    pub fn new(config: SpawnConfig) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            name: config.name,
            status: SessionStatus::Spawning,
            cwd: config.cwd,
            model: config.model,
            thinking_level: config.thinking_level,
            created_at: now,
            last_active: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}
