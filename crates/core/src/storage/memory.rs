use super::WorkflowStore;
use crate::types::{JobRecord, StepId, Workflow, WorkflowId};
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory workflow store for tests and single-process embedding.
pub struct MemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
    jobs: RwLock<HashMap<(WorkflowId, StepId), JobRecord>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn create_workflow(&self, workflow: &Workflow, jobs: &[JobRecord]) -> Result<()> {
        // Take both locks up front so the insert is all-or-nothing from the
        // point of view of readers.
        let mut workflows = self.workflows.write().await;
        let mut job_map = self.jobs.write().await;

        workflows.insert(workflow.id, workflow.clone());
        for job in jobs {
            job_map.insert((job.workflow_id, job.step_id), job.clone());
        }
        Ok(())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>> {
        Ok(self.workflows.read().await.get(&workflow_id).cloned())
    }

    async fn list_jobs(&self, workflow_id: WorkflowId) -> Result<Vec<JobRecord>> {
        let jobs = self.jobs.read().await;
        let mut records: Vec<JobRecord> = jobs
            .values()
            .filter(|job| job.workflow_id == workflow_id)
            .cloned()
            .collect();
        records.sort_by_key(|job| job.step_id);
        Ok(records)
    }

    async fn get_job(
        &self,
        workflow_id: WorkflowId,
        step_id: StepId,
    ) -> Result<Option<JobRecord>> {
        Ok(self.jobs.read().await.get(&(workflow_id, step_id)).cloned())
    }
}
