//! Core abstractions for the step workflow engine
//!
//! This crate provides the graph model, the structural validator, the
//! per-run execution record and the step handler contract. Everything that
//! drives runs lives in `stepruntime`.

mod error;
pub mod events;
mod execution;
mod handler;
mod validate;
mod workflow;

pub use error::{FlowError, StepError, WorkflowError};
pub use events::*;
pub use execution::{Execution, ExecutionId, ExecutionStatus, LogEntry, LogLevel};
pub use handler::{StepContext, StepHandler, StepOutput};
pub use validate::{validate, ValidationResult};
pub use workflow::{
    Edge, EdgeId, Port, PortDirection, Position, Step, StepId, Variables, Workflow, WorkflowId,
    END_STEP, START_STEP,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
