//! foreman: workflow orchestration over a pool of agent worker sessions.
//!
//! A workflow is a validated DAG of prompt-template steps. The engine
//! dispatches each ready step into the session pool as a worker session,
//! feeds dependency outputs into downstream prompts, and settles the run
//! step by step as workers report back. A control surface exposes ad-hoc
//! session operations (spawn, abort, approve, dismiss, shutdown) against
//! the same pool.

pub mod agent;
pub mod config;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod session;
pub mod worker;
pub mod workflow;

pub use agent::Agent;
pub use config::Config;
pub use error::{Error, Result};
pub use orchestration::{
    ControlCommand, ControlContext, RunResult, SessionEvent, SessionHandle, SessionPool,
    StepOutcome, WorkflowEngine,
};
pub use session::{Session, SessionId, SessionStatus, SpawnConfig, ThinkingLevel};
pub use worker::{ProcessBackend, WorkerBackend};
pub use workflow::{StepGraph, StepSpec, WorkflowDefinition, WorkflowRegistry};
