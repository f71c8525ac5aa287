//! Workflow definitions, validation, and prompt templating.
//!
//! This module holds the declarative side of foreman: workflow definitions
//! registered and validated by the `WorkflowRegistry`, the petgraph-backed
//! `StepGraph` that checks and traverses `depends_on` structure, and the
//! `{{variable}}` template resolver that materializes step prompts.

pub mod graph;
pub mod registry;
pub mod template;

pub use graph::StepGraph;
pub use registry::{StepSpec, WorkflowDefinition, WorkflowRegistry, BUILTIN_SOURCE};
