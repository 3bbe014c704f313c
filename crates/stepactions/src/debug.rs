use async_trait::async_trait;
use stepcore::{LogLevel, StepContext, StepError, StepHandler, StepOutput};

/// Writes a templated message to the run log
pub struct DebugLogHandler;

#[async_trait]
impl StepHandler for DebugLogHandler {
    fn step_type(&self) -> &str {
        "debug.log"
    }

    async fn invoke(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let template = ctx
            .step
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");
        let message = ctx.render(template);

        ctx.events.info(format!("DEBUG: {}", message));

        Ok(StepOutput::new().with_log(LogLevel::Info, message))
    }

    fn description(&self) -> &str {
        "Logs a message, expanding {{variable}} placeholders"
    }
}
