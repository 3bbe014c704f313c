use crate::registry::HandlerRegistry;
use crate::runs::{RunControl, RunRegistry};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use stepcore::{
    EventBus, ExecutionEvent, ExecutionStatus, StepContext, StepError, StepId, Workflow, END_STEP,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Compute the linear traversal path of a workflow.
///
/// Starts at the marked start step (or the literal `start` id) and keeps
/// following the first outgoing edge. Stops when there is no outgoing edge,
/// when the target is the literal `end` id, or when the target was already
/// visited. Returns an empty path when the graph has no start step.
pub fn execution_path(workflow: &Workflow) -> Vec<StepId> {
    let Some(start) = workflow.start_step() else {
        return Vec::new();
    };

    let mut path = vec![start.id.clone()];
    let mut current = start.id.as_str();
    while let Some(edge) = workflow.outgoing(current).next() {
        let next = edge.target.as_str();
        if next == END_STEP || path.iter().any(|id| id == next) {
            break;
        }
        path.push(next.to_string());
        current = next;
    }
    path
}

/// Drives runs along their traversal path, one step at a time
pub struct WorkflowExecutor {
    handlers: Arc<HandlerRegistry>,
    runs: Arc<RunRegistry>,
    event_bus: Arc<EventBus>,
}

impl WorkflowExecutor {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        runs: Arc<RunRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            handlers,
            runs,
            event_bus,
        }
    }

    /// Drive an admitted run on its own task
    pub fn spawn(
        self: &Arc<Self>,
        workflow: Workflow,
        execution_id: String,
        control: RunControl,
    ) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            executor.drive(&workflow, &execution_id, control).await;
        })
    }

    /// Walk the path until it is exhausted, a step fails, or the run leaves
    /// `running` for good. Pause and cancel take effect only between steps.
    pub async fn drive(&self, workflow: &Workflow, execution_id: &str, mut control: RunControl) {
        let path = execution_path(workflow);
        tracing::info!(
            execution_id = %execution_id,
            workflow_id = %workflow.id,
            "Execution path: {:?}", path
        );

        if path.is_empty() {
            self.fail_when_runnable(execution_id, "No start step found", &mut control.status)
                .await;
            return;
        }

        for step_id in &path {
            let Some(step) = workflow.step(step_id) else {
                let message = format!("Step not found: {}", step_id);
                self.fail_when_runnable(execution_id, &message, &mut control.status)
                    .await;
                return;
            };

            let variables = loop {
                if !wait_until_runnable(&mut control.status).await {
                    return;
                }
                if let Some(vars) = self.runs.enter_step(execution_id, step_id).await {
                    break vars;
                }
            };

            let handler = match self.handlers.resolve(&step.step_type) {
                Ok(handler) => handler,
                Err(e) => {
                    self.step_failed(execution_id, step_id, e, &mut control.status)
                        .await;
                    return;
                }
            };

            self.event_bus.emit(ExecutionEvent::StepStarted {
                execution_id: execution_id.to_string(),
                step_id: step_id.clone(),
                step_type: step.step_type.clone(),
                timestamp: Utc::now(),
            });

            let ctx = StepContext {
                execution_id: execution_id.to_string(),
                step: step.clone(),
                variables,
                events: self
                    .event_bus
                    .create_emitter(execution_id.to_string(), step_id.clone()),
                cancellation: control.cancel.clone(),
            };

            let started = Instant::now();
            // A panicking handler must not take the worker down with it.
            let result = tokio::spawn(async move { handler.invoke(ctx).await })
                .await
                .unwrap_or_else(|e| {
                    Err(StepError::ExecutionFailed(format!("step action panicked: {}", e)))
                });
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    self.runs.apply_output(execution_id, step_id, output).await;
                    self.event_bus.emit(ExecutionEvent::StepCompleted {
                        execution_id: execution_id.to_string(),
                        step_id: step_id.clone(),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    self.step_failed(execution_id, step_id, e, &mut control.status)
                        .await;
                    return;
                }
            }
        }

        loop {
            if !wait_until_runnable(&mut control.status).await {
                return;
            }
            if self.runs.complete(execution_id).await {
                return;
            }
        }
    }

    async fn step_failed(
        &self,
        execution_id: &str,
        step_id: &str,
        error: StepError,
        status: &mut watch::Receiver<ExecutionStatus>,
    ) {
        let message = format!("Step {} failed: {}", step_id, error);
        if self.fail_when_runnable(execution_id, &message, status).await {
            self.event_bus.emit(ExecutionEvent::StepFailed {
                execution_id: execution_id.to_string(),
                step_id: step_id.to_string(),
                error: error.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    /// Record a failure once the run is `running`. A failure that lands while
    /// the run is paused is held until resume; if the run is cancelled
    /// meanwhile the cancel stands and nothing is recorded.
    async fn fail_when_runnable(
        &self,
        execution_id: &str,
        message: &str,
        status: &mut watch::Receiver<ExecutionStatus>,
    ) -> bool {
        loop {
            if !wait_until_runnable(status).await {
                return false;
            }
            if self.runs.fail(execution_id, message).await {
                return true;
            }
            // Refused without a transition in between: the run is gone.
            if !status.has_changed().unwrap_or(false) {
                return false;
            }
        }
    }
}

/// Block while the run is paused. Returns false once it is terminal.
async fn wait_until_runnable(status: &mut watch::Receiver<ExecutionStatus>) -> bool {
    loop {
        let current = *status.borrow_and_update();
        match current {
            ExecutionStatus::Running => return true,
            ExecutionStatus::Pending | ExecutionStatus::Paused => {
                if status.changed().await.is_err() {
                    return false;
                }
            }
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                return false
            }
        }
    }
}
