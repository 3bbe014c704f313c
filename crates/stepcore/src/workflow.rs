use crate::WorkflowError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

pub type WorkflowId = String;
pub type StepId = String;
pub type EdgeId = String;

/// Name → value bindings carried by a workflow and its runs.
pub type Variables = HashMap<String, Value>;

/// Conventional id of the step traversal begins from.
pub const START_STEP: &str = "start";
/// Conventional id of the step traversal stops at.
pub const END_STEP: &str = "end";

/// Complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default)]
    pub id: WorkflowId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("workflow-{}", Uuid::new_v4()),
            name: name.into(),
            description: None,
            steps: Vec::new(),
            edges: Vec::new(),
            variables: Variables::new(),
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_creator(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }

    /// Add a step. Step ids are immutable once added, so a second step with
    /// the same id is rejected.
    pub fn add_step(&mut self, step: Step) -> Result<(), WorkflowError> {
        if self.step(&step.id).is_some() {
            return Err(WorkflowError::DuplicateStep(step.id));
        }
        self.steps.push(step);
        self.touch();
        Ok(())
    }

    /// Remove a step together with every edge touching it.
    pub fn remove_step(&mut self, step_id: &str) -> Result<Step, WorkflowError> {
        let idx = self
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or_else(|| WorkflowError::StepNotFound(step_id.to_string()))?;
        let removed = self.steps.remove(idx);
        self.edges
            .retain(|e| e.source != step_id && e.target != step_id);
        self.touch();
        Ok(removed)
    }

    /// Add an edge. Endpoints are not checked here; a dangling edge is
    /// reported by the validator.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), WorkflowError> {
        if self.edge(&edge.id).is_some() {
            return Err(WorkflowError::DuplicateEdge(edge.id));
        }
        self.edges.push(edge);
        self.touch();
        Ok(())
    }

    pub fn remove_edge(&mut self, edge_id: &str) -> Result<Edge, WorkflowError> {
        let idx = self
            .edges
            .iter()
            .position(|e| e.id == edge_id)
            .ok_or_else(|| WorkflowError::EdgeNotFound(edge_id.to_string()))?;
        let removed = self.edges.remove(idx);
        self.touch();
        Ok(removed)
    }

    /// Convenience for `add_edge(Edge::new(source, target))`.
    pub fn connect(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<EdgeId, WorkflowError> {
        let edge = Edge::new(source, target);
        let id = edge.id.clone();
        self.add_edge(edge)?;
        Ok(id)
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(key.into(), value.into());
        self.touch();
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Outgoing edges of a step, in insertion order.
    pub fn outgoing<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == step_id)
    }

    /// Id of the step traversal begins from: the first step whose data marks
    /// it as the start, falling back to [`START_STEP`] when it exists.
    pub fn start_step(&self) -> Option<&Step> {
        self.steps
            .iter()
            .find(|s| s.is_start_marker())
            .or_else(|| self.step(START_STEP))
    }

    /// Bump `updated_at`. Always moves forward, even within one clock tick.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }
}

/// Node in a workflow graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: StepId,
    #[serde(rename = "type", default)]
    pub step_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    #[serde(default)]
    pub inputs: Vec<Port>,
    #[serde(default)]
    pub outputs: Vec<Port>,
}

impl Step {
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            title: None,
            description: None,
            position: Position::default(),
            data: serde_json::Map::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn start() -> Self {
        Self::new(START_STEP, "start").with_title("Start")
    }

    pub fn end() -> Self {
        Self::new(END_STEP, "end").with_title("End")
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn with_input(mut self, port: Port) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: Port) -> Self {
        self.outputs.push(port);
        self
    }

    /// String payload entry, if present and a string.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Whether the step's data marks it as the start of the graph.
    pub fn is_start_marker(&self) -> bool {
        if self.data.get("isStart").and_then(Value::as_bool) == Some(true) {
            return true;
        }
        self.step_type == "startEnd" && self.data_str("label") == Some("Start")
    }
}

/// Typed socket on a step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", alias = "direction")]
    pub direction: PortDirection,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub required: bool,
}

impl Port {
    pub fn input(id: impl Into<String>, data_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            direction: PortDirection::Input,
            data_type: data_type.into(),
            required: false,
        }
    }

    pub fn output(id: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            direction: PortDirection::Output,
            ..Self::input(id, data_type)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

/// Directed connection between two steps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    #[serde(default)]
    pub source: StepId,
    #[serde(default)]
    pub target: StepId,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: format!("edge-{}", Uuid::new_v4()),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            kind: None,
            data: serde_json::Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_handles(
        mut self,
        source_handle: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        self.source_handle = Some(source_handle.into());
        self.target_handle = Some(target_handle.into());
        self
    }
}

/// Step position in the visual editor; no execution meaning
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}
