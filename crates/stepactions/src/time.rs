use async_trait::async_trait;
use stepcore::{StepContext, StepError, StepHandler, StepOutput};
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayHandler;

#[async_trait]
impl StepHandler for DelayHandler {
    fn step_type(&self) -> &str {
        "time.delay"
    }

    async fn invoke(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let delay_ms = match ctx.step.data.get("delay_ms") {
            None => 1000,
            Some(v) => v.as_u64().ok_or_else(|| StepError::InvalidData {
                field: "delay_ms".to_string(),
                expected: "non-negative integer".to_string(),
            })?,
        };

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => Ok(StepOutput::new()),
            _ = ctx.cancellation.cancelled() => Err(StepError::Cancelled),
        }
    }

    fn description(&self) -> &str {
        "Delay execution for specified milliseconds"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepcore::{EventBus, Step, Variables};
    use tokio_util::sync::CancellationToken;

    fn context(step: Step, cancellation: CancellationToken) -> StepContext {
        let bus = EventBus::new(8);
        StepContext {
            execution_id: "exec-1".into(),
            events: bus.create_emitter("exec-1".into(), step.id.clone()),
            step,
            variables: Variables::new(),
            cancellation,
        }
    }

    #[tokio::test]
    async fn short_delay_completes() {
        let step = Step::new("wait", "time.delay").with_data("delay_ms", 5);
        assert!(DelayHandler
            .invoke(context(step, CancellationToken::new()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn cancellation_cuts_the_delay_short() {
        let token = CancellationToken::new();
        token.cancel();
        let step = Step::new("wait", "time.delay").with_data("delay_ms", 60_000);

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            DelayHandler.invoke(context(step, token)),
        )
        .await
        .unwrap();
        assert_eq!(result, Err(StepError::Cancelled));
    }

    #[tokio::test]
    async fn rejects_non_numeric_delay() {
        let step = Step::new("wait", "time.delay").with_data("delay_ms", "soon");
        assert!(matches!(
            DelayHandler.invoke(context(step, CancellationToken::new())).await,
            Err(StepError::InvalidData { .. })
        ));
    }
}
