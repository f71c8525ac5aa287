//! Step dependency graph for workflow execution.
//!
//! `StepGraph` represents a workflow definition's `depends_on` structure as
//! a petgraph DiGraph, enabling validation (cycles, dangling references) at
//! registration time and ready-set computation during execution.

use crate::error::{Error, Result};
use crate::workflow::registry::{StepSpec, WorkflowDefinition};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// The dependency graph of one workflow definition.
///
/// Nodes are steps; an edge from A to B means B depends on A (A must
/// succeed before B can be dispatched). The graph is static once built.
pub struct StepGraph {
    graph: DiGraph<StepSpec, ()>,
    /// Index mapping from step id to NodeIndex for fast lookups.
    step_index: HashMap<String, NodeIndex>,
}

impl StepGraph {
    /// Build a graph from a definition, validating its invariants.
    ///
    /// # Errors
    /// Returns `Error::Validation` naming the offending constraint when a
    /// step id is duplicated, a `depends_on` entry references an undeclared
    /// step, or the graph contains a cycle.
    pub fn from_definition(def: &WorkflowDefinition) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut step_index = HashMap::new();

        for step in &def.steps {
            if step_index.contains_key(&step.id) {
                return Err(Error::Validation(format!(
                    "duplicate step id '{}' in workflow '{}'",
                    step.id, def.id
                )));
            }
            let index = graph.add_node(step.clone());
            step_index.insert(step.id.clone(), index);
        }

        for step in &def.steps {
            let to = step_index[&step.id];
            for dep in &step.depends_on {
                let from = *step_index.get(dep).ok_or_else(|| {
                    Error::Validation(format!(
                        "step '{}' depends on unknown step '{}' in workflow '{}'",
                        step.id, dep, def.id
                    ))
                })?;
                graph.add_edge(from, to, ());
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(Error::Validation(format!(
                "dependency cycle in workflow '{}'",
                def.id
            )));
        }

        Ok(Self { graph, step_index })
    }

    /// Get a step by its id.
    pub fn get_step(&self, id: &str) -> Option<&StepSpec> {
        self.step_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub fn step_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn contains_step(&self, id: &str) -> bool {
        self.step_index.contains_key(id)
    }

    /// Ids of all steps, in declaration order of the underlying graph.
    pub fn step_ids(&self) -> Vec<String> {
        self.graph.node_weights().map(|s| s.id.clone()).collect()
    }

    /// Steps the given step depends on (must succeed first).
    pub fn dependencies(&self, id: &str) -> Vec<&StepSpec> {
        if let Some(&index) = self.step_index.get(id) {
            self.graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .filter_map(|n| self.graph.node_weight(n))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Steps that depend directly on the given step.
    pub fn dependents(&self, id: &str) -> Vec<&StepSpec> {
        if let Some(&index) = self.step_index.get(id) {
            self.graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
                .filter_map(|n| self.graph.node_weight(n))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Get all steps ready to dispatch.
    ///
    /// A step is ready when every dependency is in the succeeded set and the
    /// step itself is not in the settled set (dispatched or terminal).
    pub fn ready_steps<'a>(
        &'a self,
        succeeded: &HashSet<String>,
        settled: &HashSet<String>,
    ) -> Vec<&'a StepSpec> {
        self.graph
            .node_indices()
            .filter_map(|index| {
                let step = self.graph.node_weight(index)?;

                if settled.contains(&step.id) {
                    return None;
                }

                let deps_satisfied = self
                    .graph
                    .neighbors_directed(index, petgraph::Direction::Incoming)
                    .all(|dep| {
                        self.graph
                            .node_weight(dep)
                            .map(|s| succeeded.contains(&s.id))
                            .unwrap_or(false)
                    });

                deps_satisfied.then_some(step)
            })
            .collect()
    }

    /// Get steps in topological order (every step after its dependencies).
    pub fn topological_order(&self) -> Result<Vec<&StepSpec>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let step_id = self
                .graph
                .node_weight(cycle.node_id())
                .map(|s| s.id.as_str())
                .unwrap_or("unknown");
            Error::Validation(format!("cycle detected at step: {}", step_id))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .collect())
    }
}

impl std::fmt::Debug for StepGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepGraph")
            .field("steps", &self.graph.node_count())
            .field("dependencies", &self.graph.edge_count())
            .finish()
    }
}
