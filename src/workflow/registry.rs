//! Workflow definition storage and validation.
//!
//! The registry validates definitions at registration time (unique step ids,
//! resolvable dependencies, acyclicity) so that a run never starts on a
//! malformed workflow. Definitions are immutable once registered.

use crate::error::{Error, Result};
use crate::workflow::graph::StepGraph;
use crate::{flog, flog_debug};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Provenance marker for definitions compiled into the binary.
pub const BUILTIN_SOURCE: &str = "builtin";

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepSpec {
    pub id: String,
    pub name: String,
    /// Ids of steps that must succeed before this one is dispatched.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Prompt template with `{{variable}}` placeholders.
    pub prompt: String,
}

/// A declarative, multi-step workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Provenance only; no runtime effect beyond traceability.
    #[serde(default)]
    pub source_path: String,
    pub steps: Vec<StepSpec>,
}

/// Stores validated workflow definitions.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    definitions: HashMap<String, WorkflowDefinition>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition after validating its invariants.
    ///
    /// # Errors
    /// `Error::Validation` when the workflow id is already registered, a
    /// step id is duplicated, a dependency is dangling, or the dependency
    /// graph is cyclic.
    pub fn register(&mut self, def: WorkflowDefinition) -> Result<()> {
        if def.id.is_empty() {
            return Err(Error::Validation("workflow id must not be empty".to_string()));
        }
        if self.definitions.contains_key(&def.id) {
            return Err(Error::Validation(format!(
                "workflow '{}' is already registered",
                def.id
            )));
        }

        // Builds the graph purely for validation; execution rebuilds it.
        StepGraph::from_definition(&def)?;

        flog!(
            "Registered workflow '{}' ({} steps, source={})",
            def.id,
            def.steps.len(),
            if def.source_path.is_empty() {
                BUILTIN_SOURCE
            } else {
                &def.source_path
            }
        );
        self.definitions.insert(def.id.clone(), def);
        Ok(())
    }

    /// Look up a definition by id.
    pub fn get(&self, id: &str) -> Result<&WorkflowDefinition> {
        self.definitions
            .get(id)
            .ok_or_else(|| Error::WorkflowNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    /// Ids of all registered workflows, sorted for stable display.
    pub fn workflow_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Load a definition from a TOML or JSON file and register it.
    ///
    /// The file's path is recorded as the definition's `source_path`.
    pub fn load_file(&mut self, path: &Path) -> Result<String> {
        flog_debug!("WorkflowRegistry::load_file path={}", path.display());
        let raw = fs::read_to_string(path)?;
        let mut def: WorkflowDefinition = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            _ => toml::from_str(&raw)?,
        };
        def.source_path = path.display().to_string();
        let id = def.id.clone();
        self.register(def)?;
        Ok(id)
    }
}
