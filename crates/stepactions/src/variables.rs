use async_trait::async_trait;
use serde_json::Value;
use stepcore::{StepContext, StepError, StepHandler, StepOutput};

/// Writes the entries of `data.assign` into the run's variables. String
/// values are template-expanded first.
pub struct SetVariablesHandler;

#[async_trait]
impl StepHandler for SetVariablesHandler {
    fn step_type(&self) -> &str {
        "variables.set"
    }

    async fn invoke(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let assign = ctx
            .require_data("assign")?
            .as_object()
            .ok_or_else(|| StepError::InvalidData {
                field: "assign".to_string(),
                expected: "object".to_string(),
            })?;

        let mut output = StepOutput::new();
        for (key, value) in assign {
            let value = match value {
                Value::String(s) => Value::String(ctx.render(s)),
                other => other.clone(),
            };
            output = output.with_variable(key.clone(), value);
        }
        Ok(output)
    }

    fn description(&self) -> &str {
        "Assigns run variables from the step's data"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepcore::{EventBus, Step, Variables};
    use tokio_util::sync::CancellationToken;

    fn context(step: Step, variables: Variables) -> StepContext {
        let bus = EventBus::new(8);
        StepContext {
            execution_id: "exec-1".into(),
            events: bus.create_emitter("exec-1".into(), step.id.clone()),
            step,
            variables,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn assigns_and_expands() {
        let mut vars = Variables::new();
        vars.insert("author".into(), json!("kim"));
        let step = Step::new("set", "variables.set")
            .with_data("assign", json!({ "reviewer": "{{author}}", "round": 2 }));

        let out = SetVariablesHandler.invoke(context(step, vars)).await.unwrap();
        assert_eq!(out.variables["reviewer"], json!("kim"));
        assert_eq!(out.variables["round"], json!(2));
    }

    #[tokio::test]
    async fn missing_assign_is_an_error() {
        let step = Step::new("set", "variables.set");
        assert_eq!(
            SetVariablesHandler.invoke(context(step, Variables::new())).await,
            Err(StepError::MissingData("assign".into()))
        );
    }
}
