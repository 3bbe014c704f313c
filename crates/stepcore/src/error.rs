use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("Maximum active executions reached: {active}/{max}")]
    AdmissionRejected { active: usize, max: usize },

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// True for errors caused by a missing workflow or execution.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FlowError::ExecutionNotFound(_) | FlowError::Workflow(WorkflowError::NotFound(_))
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("Missing step data: {0}")]
    MissingData(String),

    #[error("Invalid step data for '{field}': expected {expected}")]
    InvalidData { field: String, expected: String },

    #[error("Unknown step type: {0}")]
    UnknownStepType(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Content provider error: {0}")]
    Provider(String),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {}", .0.join(", "))]
    Invalid(Vec<String>),

    #[error("Workflow name is required")]
    NameRequired,

    #[error("Duplicate step ID: {0}")]
    DuplicateStep(String),

    #[error("Duplicate edge ID: {0}")]
    DuplicateEdge(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Edge not found: {0}")]
    EdgeNotFound(String),
}
