use crate::store::WorkflowStore;
use chrono::Utc;
use std::sync::Arc;
use stepcore::{validate, Result, ValidationResult, Workflow, WorkflowError};
use tracing::info;
use uuid::Uuid;

/// CRUD over workflow definitions. Every write is validated first and
/// nothing is stored when validation fails.
pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    pub fn validate(&self, workflow: &Workflow) -> ValidationResult {
        validate(workflow)
    }

    pub async fn create(&self, mut workflow: Workflow) -> Result<Workflow> {
        validate(&workflow).into_result()?;

        if workflow.id.trim().is_empty() {
            workflow.id = format!("workflow-{}", Uuid::new_v4());
        } else if self.store.load(&workflow.id).await?.is_some() {
            return Err(WorkflowError::Invalid(vec![format!(
                "Workflow ID already exists: {}",
                workflow.id
            )])
            .into());
        }

        let now = Utc::now();
        workflow.created_at = now;
        workflow.updated_at = now;

        self.store.save(&workflow).await?;
        info!(workflow_id = %workflow.id, "Created workflow: {}", workflow.name);
        Ok(workflow)
    }

    pub async fn update(&self, id: &str, mut workflow: Workflow) -> Result<Workflow> {
        let existing = self.get(id).await?;

        workflow.id = existing.id;
        workflow.created_at = existing.created_at;
        workflow.updated_at = existing.updated_at;
        workflow.touch();

        validate(&workflow).into_result()?;

        self.store.save(&workflow).await?;
        info!(workflow_id = %id, "Updated workflow");
        Ok(workflow)
    }

    pub async fn get(&self, id: &str) -> Result<Workflow> {
        if id.trim().is_empty() {
            return Err(WorkflowError::NotFound(id.to_string()).into());
        }
        self.store
            .load(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()).into())
    }

    /// All workflows, ordered by name
    pub async fn list(&self) -> Result<Vec<Workflow>> {
        let mut workflows = self.store.list().await?;
        workflows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(workflows)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        if id.trim().is_empty() {
            return Ok(false);
        }
        let deleted = self.store.delete(id).await?;
        if deleted {
            info!(workflow_id = %id, "Deleted workflow");
        }
        Ok(deleted)
    }

    /// Copy a workflow under a fresh id and a new name
    pub async fn duplicate(&self, id: &str, new_name: &str) -> Result<Workflow> {
        if new_name.trim().is_empty() {
            return Err(WorkflowError::NameRequired.into());
        }
        let mut copy = self.get(id).await?;
        copy.id = String::new();
        copy.name = new_name.to_string();
        self.create(copy).await
    }

    /// Case-insensitive match on name or description; a blank query
    /// returns everything
    pub async fn search(&self, query: &str) -> Result<Vec<Workflow>> {
        let query = query.trim().to_lowercase();
        let workflows = self.list().await?;
        if query.is_empty() {
            return Ok(workflows);
        }
        Ok(workflows
            .into_iter()
            .filter(|w| {
                w.name.to_lowercase().contains(&query)
                    || w
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&query))
            })
            .collect())
    }

    pub async fn by_creator(&self, user: &str) -> Result<Vec<Workflow>> {
        if user.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|w| w.created_by.as_deref() == Some(user))
            .collect())
    }

    pub async fn is_name_available(&self, name: &str) -> Result<bool> {
        if name.trim().is_empty() {
            return Ok(false);
        }
        Ok(self.list().await?.iter().all(|w| w.name != name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryWorkflowStore;
    use stepcore::{FlowError, Step};

    fn service() -> WorkflowService {
        WorkflowService::new(Arc::new(MemoryWorkflowStore::new()))
    }

    fn approval(name: &str) -> Workflow {
        let mut wf = Workflow::new(name)
            .with_description("Review then publish")
            .with_creator("editor");
        wf.id = String::new();
        wf.add_step(Step::start()).unwrap();
        wf.add_step(Step::new("review", "aemStep")).unwrap();
        wf.add_step(Step::end()).unwrap();
        wf.connect("start", "review").unwrap();
        wf.connect("review", "end").unwrap();
        wf
    }

    #[tokio::test]
    async fn create_assigns_id_and_stores() {
        let svc = service();
        let created = svc.create(approval("Approval")).await.unwrap();
        assert!(created.id.starts_with("workflow-"));
        assert_eq!(svc.get(&created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn invalid_workflow_is_not_stored() {
        let svc = service();
        let mut wf = approval("Broken");
        wf.connect("review", "ghost").unwrap();

        match svc.create(wf).await {
            Err(FlowError::Workflow(WorkflowError::Invalid(errors))) => {
                assert_eq!(errors, vec!["Edge target not found: ghost".to_string()]);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(svc.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_keeps_created_at_and_bumps_updated_at() {
        let svc = service();
        let created = svc.create(approval("Approval")).await.unwrap();

        let mut edited = created.clone();
        edited.name = "Approval v2".into();
        let updated = svc.update(&created.id, edited).await.unwrap();

        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);
        assert_eq!(svc.get(&created.id).await.unwrap().name, "Approval v2");
    }

    #[tokio::test]
    async fn update_of_missing_workflow_is_not_found() {
        let err = service()
            .update("workflow-missing", approval("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn duplicate_search_and_names() {
        let svc = service();
        let original = svc.create(approval("Blog approval")).await.unwrap();
        let copy = svc.duplicate(&original.id, "Press release").await.unwrap();

        assert_ne!(copy.id, original.id);
        assert_eq!(copy.steps.len(), original.steps.len());

        assert_eq!(svc.search("BLOG").await.unwrap().len(), 1);
        assert_eq!(svc.search("publish").await.unwrap().len(), 2);
        assert_eq!(svc.search("").await.unwrap().len(), 2);
        assert_eq!(svc.by_creator("editor").await.unwrap().len(), 2);
        assert!(svc.by_creator(" ").await.unwrap().is_empty());

        assert!(!svc.is_name_available("Press release").await.unwrap());
        assert!(svc.is_name_available("Podcast").await.unwrap());
        assert!(!svc.is_name_available("").await.unwrap());

        assert!(matches!(
            svc.duplicate(&original.id, "  ").await,
            Err(FlowError::Workflow(WorkflowError::NameRequired))
        ));
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let svc = service();
        let created = svc.create(approval("Approval")).await.unwrap();
        assert!(svc.delete(&created.id).await.unwrap());
        assert!(!svc.delete(&created.id).await.unwrap());
        assert!(!svc.delete("").await.unwrap());
    }

    #[tokio::test]
    async fn create_rejects_existing_id() {
        let svc = service();
        let created = svc.create(approval("Approval")).await.unwrap();
        assert!(svc.create(created).await.is_err());
    }
}
