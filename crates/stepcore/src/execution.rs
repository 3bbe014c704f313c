use crate::workflow::{StepId, Variables, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

pub type ExecutionId = String;

/// Lifecycle of a run.
///
/// `Pending` is entered on construction and left as soon as the run is
/// admitted. `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Legal edges of the run state machine.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (*self, next),
            (Pending, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Pending, Failed)
                | (Pending, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line of a run's log trail. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            step_id: None,
            data: None,
        }
    }

    pub fn for_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// State of one run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_step: Option<StepId>,
    #[serde(default)]
    pub started_by: Option<String>,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl Execution {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            id: format!("exec-{}", Uuid::new_v4()),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            current_step: None,
            started_by: None,
            variables: Variables::new(),
            logs: Vec::new(),
        }
    }

    pub fn add_log(&mut self, entry: LogEntry) {
        match entry.level {
            LogLevel::Debug => tracing::debug!(execution_id = %self.id, step_id = ?entry.step_id, "{}", entry.message),
            LogLevel::Info => tracing::info!(execution_id = %self.id, step_id = ?entry.step_id, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(execution_id = %self.id, step_id = ?entry.step_id, "{}", entry.message),
            LogLevel::Error => tracing::error!(execution_id = %self.id, step_id = ?entry.step_id, "{}", entry.message),
        }
        self.logs.push(entry);
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.add_log(LogEntry::new(level, message));
    }

    pub fn log_step(&mut self, level: LogLevel, step_id: &str, message: impl Into<String>) {
        self.add_log(LogEntry::new(level, message).for_step(step_id));
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(key.into(), value.into());
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status == ExecutionStatus::Paused
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Milliseconds between start and end, or until now while the run is live.
    pub fn duration_ms(&self) -> i64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds().max(0)
    }

    /// Last `limit` log entries; `0` returns all of them.
    pub fn log_tail(&self, limit: usize) -> &[LogEntry] {
        if limit == 0 || self.logs.len() <= limit {
            &self.logs
        } else {
            &self.logs[self.logs.len() - limit..]
        }
    }

    fn transition(&mut self, next: ExecutionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now().max(self.start_time));
            self.current_step = None;
        }
        true
    }

    pub fn start(&mut self) -> bool {
        if !self.transition(ExecutionStatus::Running) {
            return false;
        }
        self.log(LogLevel::Info, "Starting workflow execution");
        true
    }

    /// Record that traversal reached `step_id`.
    pub fn enter_step(&mut self, step_id: &str) -> bool {
        if !self.is_running() {
            return false;
        }
        self.current_step = Some(step_id.to_string());
        self.log_step(LogLevel::Info, step_id, format!("Executing step: {}", step_id));
        true
    }

    pub fn pause(&mut self) -> bool {
        if !self.transition(ExecutionStatus::Paused) {
            return false;
        }
        self.log(LogLevel::Info, "Execution paused by user");
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.status != ExecutionStatus::Paused || !self.transition(ExecutionStatus::Running) {
            return false;
        }
        self.log(LogLevel::Info, "Execution resumed by user");
        true
    }

    pub fn cancel(&mut self, reason: &str) -> bool {
        if !self.transition(ExecutionStatus::Cancelled) {
            return false;
        }
        self.log(LogLevel::Error, format!("Cancelled: {}", reason));
        true
    }

    pub fn complete(&mut self) -> bool {
        if !self.transition(ExecutionStatus::Completed) {
            return false;
        }
        self.log(LogLevel::Info, "Workflow execution completed successfully");
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.transition(ExecutionStatus::Failed) {
            return false;
        }
        self.log(LogLevel::Error, message);
        true
    }
}
