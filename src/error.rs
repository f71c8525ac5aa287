use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Missing template variable: {0}")]
    MissingVariable(String),

    #[error("Session pool is full (max: {max})")]
    PoolFull { max: usize },

    #[error("Spawn failed: {0}")]
    Spawn(String),

    #[error("Session not found: {0}")]
    SessionNotFound(crate::session::SessionId),

    #[error("Session {session} is {status}, expected {expected}")]
    InvalidState {
        session: crate::session::SessionId,
        status: crate::session::SessionStatus,
        expected: &'static str,
    },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: crate::session::SessionStatus,
        to: crate::session::SessionStatus,
    },

    #[error("Agent not available: {0}")]
    AgentNotAvailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
