//! Persistence collaborators.
//!
//! The engine treats storage as a synchronous key-value store keyed by id,
//! with no transactions across entities. The in-memory implementations back
//! the CLI, the tests and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use stepcore::{Execution, Result, Workflow};
use tokio::sync::RwLock;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Workflow>>;

    async fn save(&self, workflow: &Workflow) -> Result<()>;

    /// Returns false when nothing was stored under `id`.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<Workflow>>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Execution>>;

    async fn save(&self, execution: &Execution) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<bool>;

    async fn list_by_workflow(&self, workflow_id: &str) -> Result<Vec<Execution>>;

    async fn list(&self) -> Result<Vec<Execution>>;
}

#[derive(Default)]
pub struct MemoryWorkflowStore {
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn load(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn save(&self, workflow: &Workflow) -> Result<()> {
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.workflows.write().await.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<Workflow>> {
        Ok(self.workflows.read().await.values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryExecutionStore {
    executions: RwLock<HashMap<String, Execution>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn load(&self, id: &str) -> Result<Option<Execution>> {
        Ok(self.executions.read().await.get(id).cloned())
    }

    async fn save(&self, execution: &Execution) -> Result<()> {
        self.executions
            .write()
            .await
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.executions.write().await.remove(id).is_some())
    }

    async fn list_by_workflow(&self, workflow_id: &str) -> Result<Vec<Execution>> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<Execution>> {
        Ok(self.executions.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn workflow_store_round_trip() {
        let store = MemoryWorkflowStore::new();
        let wf = Workflow::new("Newsletter");
        store.save(&wf).await.unwrap();

        assert_eq!(store.load(&wf.id).await.unwrap(), Some(wf.clone()));
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.delete(&wf.id).await.unwrap());
        assert!(!store.delete(&wf.id).await.unwrap());
        assert!(store.load(&wf.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn execution_store_filters_by_workflow() {
        let store = MemoryExecutionStore::new();
        store.save(&Execution::new("wf-a")).await.unwrap();
        store.save(&Execution::new("wf-a")).await.unwrap();
        store.save(&Execution::new("wf-b")).await.unwrap();

        assert_eq!(store.list_by_workflow("wf-a").await.unwrap().len(), 2);
        assert_eq!(store.list_by_workflow("wf-c").await.unwrap().len(), 0);
        assert_eq!(store.list().await.unwrap().len(), 3);
    }
}
