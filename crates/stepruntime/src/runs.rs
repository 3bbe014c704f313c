//! Table of runs known to this process.
//!
//! The registry is the single authority on how many runs are active. Every
//! mutation (admission, status transition, removal) happens under one write
//! lock, so concurrent start requests cannot overshoot the cap and racing
//! pause/resume/cancel calls resolve to a no-op for the loser.

use crate::store::ExecutionStore;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use stepcore::{
    EventBus, Execution, ExecutionEvent, ExecutionId, ExecutionStatus, FlowError, LogEntry,
    LogLevel, Result, StepOutput, Variables,
};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct RunSlot {
    execution: Execution,
    status: watch::Sender<ExecutionStatus>,
    cancel: CancellationToken,
}

impl RunSlot {
    fn publish(&self) {
        self.status.send_replace(self.execution.status);
    }
}

/// Signals a run's worker listens to
#[derive(Debug)]
pub struct RunControl {
    pub status: watch::Receiver<ExecutionStatus>,
    pub cancel: CancellationToken,
}

/// Aggregate counters over runs
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatistics {
    pub total: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean duration of finished runs, in milliseconds
    pub average_duration_ms: f64,
}

impl ExecutionStatistics {
    pub fn success_rate(&self) -> f64 {
        percent(self.completed, self.total)
    }

    pub fn failure_rate(&self) -> f64 {
        percent(self.failed, self.total)
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

pub struct RunRegistry {
    runs: RwLock<HashMap<ExecutionId, RunSlot>>,
    max_active: usize,
    store: Arc<dyn ExecutionStore>,
    events: Arc<EventBus>,
}

impl RunRegistry {
    pub fn new(max_active: usize, store: Arc<dyn ExecutionStore>, events: Arc<EventBus>) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            max_active,
            store,
            events,
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Admit a pending run and move it to `running`.
    ///
    /// Fails with [`FlowError::AdmissionRejected`] when the number of
    /// non-terminal runs has reached the cap; nothing is recorded then.
    pub async fn admit(&self, mut execution: Execution) -> Result<(Execution, RunControl)> {
        let mut runs = self.runs.write().await;

        let active = runs.values().filter(|s| !s.execution.is_terminal()).count();
        if active >= self.max_active {
            warn!(
                workflow_id = %execution.workflow_id,
                "Rejecting run: {} of {} slots in use", active, self.max_active
            );
            return Err(FlowError::AdmissionRejected {
                active,
                max: self.max_active,
            });
        }

        execution.start();
        let (status, rx) = watch::channel(execution.status);
        let cancel = CancellationToken::new();
        let control = RunControl {
            status: rx,
            cancel: cancel.clone(),
        };
        let snapshot = execution.clone();

        runs.insert(
            execution.id.clone(),
            RunSlot {
                execution,
                status,
                cancel,
            },
        );
        drop(runs);

        self.events.emit(ExecutionEvent::RunStarted {
            execution_id: snapshot.id.clone(),
            workflow_id: snapshot.workflow_id.clone(),
            timestamp: Utc::now(),
        });
        Ok((snapshot, control))
    }

    /// Number of runs not yet in a terminal state
    pub async fn active_count(&self) -> usize {
        self.runs
            .read()
            .await
            .values()
            .filter(|s| !s.execution.is_terminal())
            .count()
    }

    /// Look a run up in the table, then in the store
    pub async fn get(&self, id: &str) -> Result<Execution> {
        if let Some(slot) = self.runs.read().await.get(id) {
            return Ok(slot.execution.clone());
        }
        self.store
            .load(id)
            .await?
            .ok_or_else(|| FlowError::ExecutionNotFound(id.to_string()))
    }

    pub async fn status(&self, id: &str) -> Result<ExecutionStatus> {
        Ok(self.get(id).await?.status)
    }

    pub async fn variables(&self, id: &str) -> Result<Variables> {
        Ok(self.get(id).await?.variables)
    }

    pub async fn duration_ms(&self, id: &str) -> Result<i64> {
        Ok(self.get(id).await?.duration_ms())
    }

    /// Latest `limit` log entries of a run; `0` returns all of them
    pub async fn logs(&self, id: &str, limit: usize) -> Result<Vec<LogEntry>> {
        Ok(self.get(id).await?.log_tail(limit).to_vec())
    }

    /// Runs of one workflow, live and persisted, newest first
    pub async fn list_by_workflow(&self, workflow_id: &str) -> Result<Vec<Execution>> {
        let mut found: HashMap<ExecutionId, Execution> = self
            .store
            .list_by_workflow(workflow_id)
            .await?
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        for slot in self.runs.read().await.values() {
            if slot.execution.workflow_id == workflow_id {
                found.insert(slot.execution.id.clone(), slot.execution.clone());
            }
        }

        Ok(newest_first(found.into_values().collect()))
    }

    pub async fn list_running(&self) -> Vec<Execution> {
        self.filter(|e| e.status == ExecutionStatus::Running).await
    }

    pub async fn list_by_user(&self, user: &str) -> Vec<Execution> {
        newest_first(self.filter(|e| e.started_by.as_deref() == Some(user)).await)
    }

    pub async fn list_recent(&self, limit: usize) -> Vec<Execution> {
        let mut all = newest_first(self.filter(|_| true).await);
        all.truncate(limit);
        all
    }

    async fn filter(&self, keep: impl Fn(&Execution) -> bool) -> Vec<Execution> {
        self.runs
            .read()
            .await
            .values()
            .filter(|s| keep(&s.execution))
            .map(|s| s.execution.clone())
            .collect()
    }

    /// Counters over live and persisted runs, optionally for one workflow.
    /// Falls back to the live table alone when the store cannot be read.
    pub async fn statistics(&self, workflow_id: Option<&str>) -> ExecutionStatistics {
        let persisted = match workflow_id {
            Some(id) => self.store.list_by_workflow(id).await,
            None => self.store.list().await,
        };
        let mut found: HashMap<ExecutionId, Execution> = match persisted {
            Ok(runs) => runs.into_iter().map(|e| (e.id.clone(), e)).collect(),
            Err(e) => {
                warn!("Failed to read persisted executions for statistics: {}", e);
                HashMap::new()
            }
        };
        for run in self
            .filter(|e| workflow_id.map_or(true, |id| e.workflow_id == id))
            .await
        {
            found.insert(run.id.clone(), run);
        }
        let runs: Vec<Execution> = found.into_values().collect();

        let mut stats = ExecutionStatistics {
            total: runs.len(),
            ..Default::default()
        };
        let mut finished_ms = Vec::new();
        for run in &runs {
            match run.status {
                ExecutionStatus::Running | ExecutionStatus::Pending => stats.running += 1,
                ExecutionStatus::Paused => stats.paused += 1,
                ExecutionStatus::Completed => stats.completed += 1,
                ExecutionStatus::Failed => stats.failed += 1,
                ExecutionStatus::Cancelled => stats.cancelled += 1,
            }
            if run.is_terminal() {
                finished_ms.push(run.duration_ms() as f64);
            }
        }
        if !finished_ms.is_empty() {
            stats.average_duration_ms = finished_ms.iter().sum::<f64>() / finished_ms.len() as f64;
        }
        stats
    }

    /// Wait until a run reaches a terminal status and return it
    pub async fn wait_for(&self, id: &str) -> Result<Execution> {
        let rx = self
            .runs
            .read()
            .await
            .get(id)
            .map(|slot| slot.status.subscribe());

        if let Some(mut rx) = rx {
            // A dropped sender means the slot was swept; fall through to the store.
            let _ = rx.wait_for(|s| s.is_terminal()).await;
        }
        self.get(id).await
    }

    pub async fn pause(&self, id: &str) -> bool {
        let paused = self.transition(id, |e| e.pause()).await;
        if paused {
            info!(execution_id = %id, "Paused execution");
            self.events.emit(ExecutionEvent::RunPaused {
                execution_id: id.to_string(),
                timestamp: Utc::now(),
            });
        }
        paused
    }

    pub async fn resume(&self, id: &str) -> bool {
        let resumed = self.transition(id, |e| e.resume()).await;
        if resumed {
            info!(execution_id = %id, "Resumed execution");
            self.events.emit(ExecutionEvent::RunResumed {
                execution_id: id.to_string(),
                timestamp: Utc::now(),
            });
        }
        resumed
    }

    /// Cancel a running or paused run. The in-flight step, if any, is not
    /// interrupted; traversal stops at the next step boundary.
    pub async fn cancel(&self, id: &str, reason: &str) -> bool {
        let cancelled = self.transition(id, |e| e.cancel(reason)).await;
        if cancelled {
            info!(execution_id = %id, "Cancelled execution: {}", reason);
        }
        cancelled
    }

    /// Mark the run as having reached `step_id`. Returns the variables the
    /// step should see, or `None` when the run is no longer running.
    pub async fn enter_step(&self, id: &str, step_id: &str) -> Option<Variables> {
        let mut runs = self.runs.write().await;
        let slot = runs.get_mut(id)?;
        if slot.execution.enter_step(step_id) {
            Some(slot.execution.variables.clone())
        } else {
            None
        }
    }

    /// Apply a step's variable writes and log lines. Ignored once the run
    /// is terminal.
    pub async fn apply_output(&self, id: &str, step_id: &str, output: StepOutput) {
        let mut runs = self.runs.write().await;
        let Some(slot) = runs.get_mut(id) else {
            return;
        };
        if slot.execution.is_terminal() {
            return;
        }
        for (level, message) in output.logs {
            slot.execution.log_step(level, step_id, message);
        }
        for (key, value) in output.variables {
            slot.execution
                .log_step(LogLevel::Debug, step_id, format!("Updated variable: {}", key));
            slot.execution.set_variable(key, value);
        }
    }

    pub async fn complete(&self, id: &str) -> bool {
        self.transition(id, |e| e.complete()).await
    }

    pub async fn fail(&self, id: &str, message: &str) -> bool {
        self.transition(id, |e| e.fail(message)).await
    }

    async fn transition(&self, id: &str, apply: impl FnOnce(&mut Execution) -> bool) -> bool {
        let finished = {
            let mut runs = self.runs.write().await;
            let Some(slot) = runs.get_mut(id) else {
                return false;
            };
            if !apply(&mut slot.execution) {
                return false;
            }
            slot.publish();
            if !slot.execution.is_terminal() {
                return true;
            }
            slot.cancel.cancel();
            slot.execution.clone()
        };

        self.events.emit(ExecutionEvent::RunFinished {
            execution_id: finished.id.clone(),
            status: finished.status,
            duration_ms: finished.duration_ms() as u64,
            timestamp: Utc::now(),
        });
        if let Err(e) = self.store.save(&finished).await {
            warn!(execution_id = %finished.id, "Failed to persist execution: {}", e);
        }
        true
    }

    /// Drop terminal runs that ended more than `days` days ago. Live runs
    /// are never touched.
    pub async fn cleanup_older_than(&self, days: u32) -> usize {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, slot| {
            !(slot.execution.is_terminal()
                && slot.execution.end_time.is_some_and(|end| end < cutoff))
        });
        let removed = before - runs.len();
        if removed > 0 {
            info!("Cleaned up {} executions older than {} days", removed, days);
        }
        removed
    }
}

fn newest_first(mut runs: Vec<Execution>) -> Vec<Execution> {
    runs.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| a.id.cmp(&b.id)));
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryExecutionStore;

    fn registry(max: usize) -> RunRegistry {
        RunRegistry::new(
            max,
            Arc::new(MemoryExecutionStore::new()),
            Arc::new(EventBus::new(64)),
        )
    }

    #[tokio::test]
    async fn admission_stops_at_the_cap() {
        let reg = registry(2);
        reg.admit(Execution::new("wf")).await.unwrap();
        reg.admit(Execution::new("wf")).await.unwrap();

        let err = reg.admit(Execution::new("wf")).await.unwrap_err();
        assert!(matches!(err, FlowError::AdmissionRejected { active: 2, max: 2 }));
        assert_eq!(reg.active_count().await, 2);
    }

    #[tokio::test]
    async fn terminal_runs_free_their_slot() {
        let reg = registry(1);
        let (first, _control) = reg.admit(Execution::new("wf")).await.unwrap();
        assert!(reg.admit(Execution::new("wf")).await.is_err());

        assert!(reg.cancel(&first.id, "make room").await);
        assert!(reg.admit(Execution::new("wf")).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_admission_never_exceeds_cap() {
        let reg = Arc::new(registry(5));
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let reg = reg.clone();
            tasks.push(tokio::spawn(async move {
                reg.admit(Execution::new("wf")).await.is_ok()
            }));
        }
        let admitted = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(admitted, 5);
        assert_eq!(reg.active_count().await, 5);
    }

    #[tokio::test]
    async fn pause_resume_cancel_follow_the_state_machine() {
        let reg = registry(4);
        let (run, mut control) = reg.admit(Execution::new("wf")).await.unwrap();

        assert!(!reg.resume(&run.id).await);
        assert!(reg.pause(&run.id).await);
        assert!(!reg.pause(&run.id).await);
        assert_eq!(*control.status.borrow_and_update(), ExecutionStatus::Paused);

        assert!(reg.cancel(&run.id, "stop").await);
        assert!(control.cancel.is_cancelled());
        assert!(!reg.resume(&run.id).await);

        let run = reg.get(&run.id).await.unwrap();
        assert_eq!(run.status, ExecutionStatus::Cancelled);
        assert!(run.current_step.is_none());
    }

    #[tokio::test]
    async fn racing_cancels_transition_once() {
        let reg = Arc::new(registry(4));
        let (run, _control) = reg.admit(Execution::new("wf")).await.unwrap();

        let a = tokio::spawn({
            let (reg, id) = (reg.clone(), run.id.clone());
            async move { reg.cancel(&id, "a").await }
        });
        let b = tokio::spawn({
            let (reg, id) = (reg.clone(), run.id.clone());
            async move { reg.cancel(&id, "b").await }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a ^ b);

        let run = reg.get(&run.id).await.unwrap();
        let cancellations = run
            .logs
            .iter()
            .filter(|l| l.message.starts_with("Cancelled:"))
            .count();
        assert_eq!(cancellations, 1);
    }

    #[tokio::test]
    async fn unknown_ids() {
        let reg = registry(1);
        assert!(!reg.pause("exec-missing").await);
        assert!(!reg.cancel("exec-missing", "x").await);
        assert!(reg.get("exec-missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn step_output_is_applied_until_terminal() {
        let reg = registry(1);
        let (run, _control) = reg.admit(Execution::new("wf")).await.unwrap();

        let vars = reg.enter_step(&run.id, "draft").await.unwrap();
        assert!(vars.is_empty());
        reg.apply_output(
            &run.id,
            "draft",
            StepOutput::new()
                .with_variable("headline", "Hello")
                .with_log(LogLevel::Info, "generated"),
        )
        .await;
        assert_eq!(
            reg.variables(&run.id).await.unwrap()["headline"],
            serde_json::json!("Hello")
        );

        reg.cancel(&run.id, "done").await;
        reg.apply_output(&run.id, "draft", StepOutput::new().with_variable("late", 1))
            .await;
        assert!(!reg.variables(&run.id).await.unwrap().contains_key("late"));
        assert!(reg.enter_step(&run.id, "next").await.is_none());
    }

    #[tokio::test]
    async fn terminal_runs_are_persisted() {
        let store = Arc::new(MemoryExecutionStore::new());
        let reg = RunRegistry::new(1, store.clone(), Arc::new(EventBus::new(8)));
        let (run, _control) = reg.admit(Execution::new("wf")).await.unwrap();
        assert!(reg.complete(&run.id).await);

        let saved = store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(saved.status, ExecutionStatus::Completed);

        assert_eq!(reg.cleanup_older_than(0).await, 1);
        // Still reachable through the store after being swept.
        assert_eq!(reg.get(&run.id).await.unwrap().status, ExecutionStatus::Completed);
        assert_eq!(reg.list_by_workflow("wf").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_spares_live_and_recent_runs() {
        let reg = registry(3);
        let (live, _c1) = reg.admit(Execution::new("wf")).await.unwrap();
        let (done, _c2) = reg.admit(Execution::new("wf")).await.unwrap();
        reg.complete(&done.id).await;

        assert_eq!(reg.cleanup_older_than(30).await, 0);
        assert_eq!(reg.cleanup_older_than(0).await, 1);
        assert!(reg.get(&live.id).await.is_ok());
    }

    #[tokio::test]
    async fn statistics_count_by_status() {
        let reg = registry(5);
        let (a, _ca) = reg.admit(Execution::new("wf")).await.unwrap();
        let (b, _cb) = reg.admit(Execution::new("wf")).await.unwrap();
        let (_c, _cc) = reg.admit(Execution::new("other")).await.unwrap();
        reg.complete(&a.id).await;
        reg.fail(&b.id, "boom").await;

        let stats = reg.statistics(Some("wf")).await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.success_rate(), 50.0);

        let all = reg.statistics(None).await;
        assert_eq!(all.total, 3);
        assert_eq!(all.running, 1);
    }

    #[tokio::test]
    async fn statistics_keep_swept_runs() {
        let reg = registry(3);
        let (done, _c1) = reg.admit(Execution::new("wf")).await.unwrap();
        let (_live, _c2) = reg.admit(Execution::new("wf")).await.unwrap();
        reg.complete(&done.id).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(reg.cleanup_older_than(0).await, 1);

        let stats = reg.statistics(Some("wf")).await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(reg.statistics(None).await.total, 2);
        assert_eq!(reg.statistics(Some("other")).await.total, 0);
    }

    #[tokio::test]
    async fn wait_for_returns_terminal_snapshot() {
        let reg = Arc::new(registry(1));
        let (run, _control) = reg.admit(Execution::new("wf")).await.unwrap();

        let waiter = tokio::spawn({
            let (reg, id) = (reg.clone(), run.id.clone());
            async move { reg.wait_for(&id).await }
        });
        tokio::task::yield_now().await;
        reg.fail(&run.id, "provider down").await;

        let finished = waiter.await.unwrap().unwrap();
        assert_eq!(finished.status, ExecutionStatus::Failed);
    }
}
