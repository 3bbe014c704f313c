use crate::events::EventEmitter;
use crate::execution::{ExecutionId, LogLevel};
use crate::workflow::{Step, Variables};
use crate::StepError;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Behaviour behind a step type.
///
/// Handlers are treated as opaque, possibly slow, possibly failing calls.
/// The engine never retries them and never interrupts one mid-flight.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Step type this handler serves (e.g. "ai.generate", "time.delay")
    fn step_type(&self) -> &str;

    /// Run the step against a snapshot of the run's variables
    async fn invoke(&self, ctx: StepContext) -> Result<StepOutput, StepError>;

    /// Short human readable description
    fn description(&self) -> &str {
        ""
    }
}

/// Everything a handler gets to see of the run
#[derive(Clone)]
pub struct StepContext {
    pub execution_id: ExecutionId,

    pub step: Step,

    /// Variables as they were when the step began
    pub variables: Variables,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Fires when the run is cancelled; observing it is optional
    pub cancellation: CancellationToken,
}

impl StepContext {
    /// Get a required entry of the step's data payload
    pub fn require_data(&self, key: &str) -> Result<&Value, StepError> {
        self.step
            .data
            .get(key)
            .ok_or_else(|| StepError::MissingData(key.to_string()))
    }

    pub fn require_str(&self, key: &str) -> Result<&str, StepError> {
        self.require_data(key)?
            .as_str()
            .ok_or_else(|| StepError::InvalidData {
                field: key.to_string(),
                expected: "string".to_string(),
            })
    }

    pub fn data_or(&self, key: &str, default: Value) -> Value {
        self.step.data.get(key).cloned().unwrap_or(default)
    }

    /// Replace `{{name}}` placeholders with run variables. Unknown names are
    /// left untouched; non-string values are rendered as JSON.
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            match after.find("}}") {
                Some(close) => {
                    let name = after[..close].trim();
                    match self.variables.get(name) {
                        Some(Value::String(s)) => out.push_str(s),
                        Some(other) => out.push_str(&other.to_string()),
                        None => out.push_str(&rest[open..open + 2 + close + 2]),
                    }
                    rest = &after[close + 2..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Result of a successful step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Variable writes, applied to the run in traversal order
    pub variables: Variables,

    /// Extra lines for the run's log trail
    pub logs: Vec<(LogLevel, String)>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_log(mut self, level: LogLevel, message: impl Into<String>) -> Self {
        self.logs.push((level, message.into()));
        self
    }
}
