use crate::definitions::WorkflowService;
use crate::executor::WorkflowExecutor;
use crate::registry::HandlerRegistry;
use crate::runs::RunRegistry;
use crate::store::{ExecutionStore, MemoryExecutionStore, MemoryWorkflowStore, WorkflowStore};
use crate::RuntimeConfig;
use serde_json::Value;
use std::sync::Arc;
use stepcore::{EventBus, Execution, ExecutionEvent, Result, Variables};
use tokio::sync::broadcast;

/// Main runtime: definitions, the run table and the executor wired together
pub struct StepRuntime {
    config: RuntimeConfig,
    handlers: Arc<HandlerRegistry>,
    definitions: Arc<WorkflowService>,
    runs: Arc<RunRegistry>,
    executor: Arc<WorkflowExecutor>,
    event_bus: Arc<EventBus>,
}

impl StepRuntime {
    /// Create a new runtime with default settings and no step handlers
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(HandlerRegistry::new()), config)
    }

    /// Create a runtime over a pre-configured handler registry, with
    /// in-memory persistence
    pub fn with_registry(handlers: Arc<HandlerRegistry>, config: RuntimeConfig) -> Self {
        Self::with_stores(
            handlers,
            config,
            Arc::new(MemoryWorkflowStore::new()),
            Arc::new(MemoryExecutionStore::new()),
        )
    }

    pub fn with_stores(
        handlers: Arc<HandlerRegistry>,
        config: RuntimeConfig,
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let runs = Arc::new(RunRegistry::new(
            config.max_active_executions,
            executions,
            event_bus.clone(),
        ));
        let executor = Arc::new(WorkflowExecutor::new(
            handlers.clone(),
            runs.clone(),
            event_bus.clone(),
        ));

        Self {
            config,
            handlers,
            definitions: Arc::new(WorkflowService::new(workflows)),
            runs,
            executor,
            event_bus,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn definitions(&self) -> &Arc<WorkflowService> {
        &self.definitions
    }

    pub fn runs(&self) -> &Arc<RunRegistry> {
        &self.runs
    }

    /// Start a run of a stored workflow.
    ///
    /// Returns as soon as the run is admitted; the run itself proceeds on
    /// its own task and its outcome is observed through [`Self::get_run`]
    /// or [`RunRegistry::wait_for`].
    pub async fn start_run(
        &self,
        workflow_id: &str,
        user_id: &str,
        initial_variables: Variables,
    ) -> Result<Execution> {
        let workflow = self.definitions.get(workflow_id).await?;

        let mut execution = Execution::new(&workflow.id);
        execution.started_by = Some(user_id.to_string());
        execution.variables = workflow.variables.clone();
        execution.variables.extend(initial_variables);
        execution.set_variable("workflowName", workflow.name.clone());
        execution.set_variable(
            "workflowDescription",
            workflow.description.clone().map_or(Value::Null, Value::String),
        );
        execution.set_variable("startedBy", user_id);
        execution.set_variable("startTime", execution.start_time.to_rfc3339());

        let (execution, control) = self.runs.admit(execution).await?;
        self.executor
            .spawn(workflow, execution.id.clone(), control);

        tracing::info!(
            execution_id = %execution.id,
            workflow_id = %workflow_id,
            "Started workflow execution by user: {}", user_id
        );
        Ok(execution)
    }

    pub async fn get_run(&self, execution_id: &str) -> Result<Execution> {
        self.runs.get(execution_id).await
    }

    pub async fn pause(&self, execution_id: &str) -> bool {
        self.runs.pause(execution_id).await
    }

    pub async fn resume(&self, execution_id: &str) -> bool {
        self.runs.resume(execution_id).await
    }

    pub async fn cancel(&self, execution_id: &str, reason: &str) -> bool {
        self.runs.cancel(execution_id, reason).await
    }

    /// Sweep terminal runs past the configured retention window
    pub async fn cleanup_expired(&self) -> usize {
        self.runs
            .cleanup_older_than(self.config.cleanup_after_days)
            .await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for StepRuntime {
    fn default() -> Self {
        Self::new()
    }
}
