use async_trait::async_trait;
use stepcore::{LogLevel, StepContext, StepError, StepHandler, StepOutput};

/// Start, end and branch markers: nothing to do
pub struct PassThroughHandler;

#[async_trait]
impl StepHandler for PassThroughHandler {
    fn step_type(&self) -> &str {
        "start"
    }

    async fn invoke(&self, _ctx: StepContext) -> Result<StepOutput, StepError> {
        Ok(StepOutput::new())
    }

    fn description(&self) -> &str {
        "Structural step, passes straight through"
    }
}

/// Fallback for step types without a registered handler
pub struct NoopHandler;

#[async_trait]
impl StepHandler for NoopHandler {
    fn step_type(&self) -> &str {
        "noop"
    }

    async fn invoke(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        tracing::debug!(
            execution_id = %ctx.execution_id,
            step_id = %ctx.step.id,
            "No handler registered for step type: {}", ctx.step.step_type
        );
        Ok(StepOutput::new().with_log(
            LogLevel::Debug,
            format!("No handler registered for step type: {}", ctx.step.step_type),
        ))
    }

    fn description(&self) -> &str {
        "Logs that the step type is unhandled and moves on"
    }
}
