//! Workflow execution runtime
//!
//! This crate drives runs of workflow graphs: it computes the traversal
//! path, walks it on a task per run, enforces the cap on concurrently active
//! runs and keeps workflow definitions behind a validating service.

mod config;
mod definitions;
mod executor;
mod registry;
mod runs;
mod runtime;
pub mod store;

pub use config::RuntimeConfig;
pub use definitions::WorkflowService;
pub use executor::{execution_path, WorkflowExecutor};
pub use registry::HandlerRegistry;
pub use runs::{ExecutionStatistics, RunControl, RunRegistry};
pub use runtime::StepRuntime;
pub use store::{ExecutionStore, MemoryExecutionStore, MemoryWorkflowStore, WorkflowStore};
