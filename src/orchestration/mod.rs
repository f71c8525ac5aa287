//! Orchestration layer: session pool, workflow engine, control surface.

pub mod control;
pub mod engine;
pub mod pool;

pub use control::{
    apply_to_all, visible_commands, BatchReport, CommandDescriptor, ControlCommand,
    ControlContext, Interaction, IssueContext,
};
pub use engine::{RunResult, StepOutcome, WorkflowEngine};
pub use pool::{SessionEvent, SessionHandle, SessionPool, ShutdownReport};
