//! Structural checks for workflow graphs.
//!
//! Validation is pure: it never mutates the workflow and returns the same
//! result for the same content.

use crate::workflow::{Workflow, END_STEP, START_STEP};
use crate::WorkflowError;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Outcome of [`validate`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Convert to a `Result`, carrying every error message on failure.
    pub fn into_result(self) -> Result<Vec<String>, WorkflowError> {
        if self.valid {
            Ok(self.warnings)
        } else {
            Err(WorkflowError::Invalid(self.errors))
        }
    }
}

/// Check a workflow against the structural rules.
pub fn validate(workflow: &Workflow) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if workflow.name.trim().is_empty() {
        errors.push("Workflow name is required".to_string());
    }

    if workflow.steps.is_empty() {
        errors.push("Workflow must have at least one step".to_string());
        return ValidationResult {
            valid: false,
            errors,
            warnings,
        };
    }

    let mut step_ids: HashSet<&str> = HashSet::new();
    for step in &workflow.steps {
        if step.id.trim().is_empty() {
            errors.push("Step ID is required".to_string());
        } else if !step_ids.insert(step.id.as_str()) {
            errors.push(format!("Duplicate step ID: {}", step.id));
        }

        if step.step_type.trim().is_empty() {
            errors.push(format!("Step type is required for step: {}", step.id));
        }
    }

    let mut dangling = false;
    for edge in &workflow.edges {
        for (role, endpoint) in [("source", &edge.source), ("target", &edge.target)] {
            if endpoint.trim().is_empty() {
                errors.push(format!("Edge {} is required (edge {})", role, edge.id));
                dangling = true;
            } else if !step_ids.contains(endpoint.as_str()) {
                errors.push(format!("Edge {} not found: {}", role, endpoint));
                dangling = true;
            }
        }
    }

    if !step_ids.contains(START_STEP) {
        warnings.push("Workflow should have a start node".to_string());
    }
    if !step_ids.contains(END_STEP) {
        warnings.push("Workflow should have an end node".to_string());
    }

    if !dangling && has_cycle(workflow, &step_ids) {
        warnings.push(
            "Workflow contains a cycle; traversal stops at the first revisited step".to_string(),
        );
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn has_cycle(workflow: &Workflow, step_ids: &HashSet<&str>) -> bool {
    let mut graph = DiGraph::<&str, ()>::new();
    let index: HashMap<&str, _> = step_ids.iter().map(|id| (*id, graph.add_node(*id))).collect();

    for edge in &workflow.edges {
        if let (Some(from), Some(to)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) {
            graph.add_edge(*from, *to, ());
        }
    }

    is_cyclic_directed(&graph)
}
