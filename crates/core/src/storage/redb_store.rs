use super::WorkflowStore;
use crate::types::{JobRecord, StepId, Workflow, WorkflowId};
use anyhow::{Context, Result};
use redb::{Database, TableDefinition};
use std::path::PathBuf;
use std::sync::Arc;

const WORKFLOWS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("workflows");
const JOBS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Workflow store backed by redb.
///
/// Records are stored as JSON values. Every trait method runs inside a single
/// write (or read) transaction, which gives `create_workflow` its
/// all-or-nothing guarantee.
#[derive(Clone)]
pub struct RedbWorkflowStore {
    db: Arc<Database>,
}

impl RedbWorkflowStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create store directory")?;
        }

        let db = Database::create(&path).context("Failed to create redb database")?;

        // Initialize tables
        let write_txn = db.begin_write().context("Failed to begin write transaction")?;
        {
            let _workflows = write_txn
                .open_table(WORKFLOWS_TABLE)
                .context("Failed to open workflows table")?;
            let _jobs = write_txn
                .open_table(JOBS_TABLE)
                .context("Failed to open jobs table")?;
        }
        write_txn.commit().context("Failed to commit transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Job keys sort lexicographically in step order: the step id is
    /// zero-padded so a range scan yields jobs in assignment order.
    fn job_key(workflow_id: WorkflowId, step_id: StepId) -> String {
        format!("{}/{:020}", workflow_id, step_id.0)
    }
}

#[async_trait::async_trait]
impl WorkflowStore for RedbWorkflowStore {
    async fn create_workflow(&self, workflow: &Workflow, jobs: &[JobRecord]) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut workflows = write_txn
                .open_table(WORKFLOWS_TABLE)
                .context("Failed to open workflows table")?;
            let key = workflow.id.to_string();
            let value = serde_json::to_vec(workflow).context("Failed to serialize workflow")?;
            workflows
                .insert(key.as_str(), value.as_slice())
                .context("Failed to insert workflow")?;

            let mut job_table = write_txn
                .open_table(JOBS_TABLE)
                .context("Failed to open jobs table")?;
            for job in jobs {
                let key = Self::job_key(job.workflow_id, job.step_id);
                let value = serde_json::to_vec(job).context("Failed to serialize job")?;
                job_table
                    .insert(key.as_str(), value.as_slice())
                    .context("Failed to insert job")?;
            }
        }
        write_txn.commit().context("Failed to commit")?;
        Ok(())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut workflows = write_txn
                .open_table(WORKFLOWS_TABLE)
                .context("Failed to open workflows table")?;
            let key = workflow.id.to_string();
            let value = serde_json::to_vec(workflow).context("Failed to serialize workflow")?;
            workflows
                .insert(key.as_str(), value.as_slice())
                .context("Failed to update workflow")?;
        }
        write_txn.commit().context("Failed to commit")?;
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(WORKFLOWS_TABLE)
            .context("Failed to open workflows table")?;

        let key = workflow_id.to_string();
        let value = table.get(key.as_str()).context("Failed to get workflow")?;

        match value {
            Some(guard) => {
                let workflow: Workflow = serde_json::from_slice(guard.value())
                    .context("Failed to deserialize workflow")?;
                Ok(Some(workflow))
            }
            None => Ok(None),
        }
    }

    async fn list_jobs(&self, workflow_id: WorkflowId) -> Result<Vec<JobRecord>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(JOBS_TABLE)
            .context("Failed to open jobs table")?;

        // '0' is the first ASCII character after the '/' separator, so this
        // range covers exactly the workflow's keys.
        let start = format!("{}/", workflow_id);
        let end = format!("{}0", workflow_id);

        let mut jobs = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .context("Failed to scan jobs")?
        {
            let (_, value) = entry.context("Failed to read job entry")?;
            let job: JobRecord =
                serde_json::from_slice(value.value()).context("Failed to deserialize job")?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    async fn get_job(
        &self,
        workflow_id: WorkflowId,
        step_id: StepId,
    ) -> Result<Option<JobRecord>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(JOBS_TABLE)
            .context("Failed to open jobs table")?;

        let key = Self::job_key(workflow_id, step_id);
        let value = table.get(key.as_str()).context("Failed to get job")?;

        match value {
            Some(guard) => {
                let job: JobRecord =
                    serde_json::from_slice(guard.value()).context("Failed to deserialize job")?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobId, WorkflowStatus};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn sample_workflow() -> Workflow {
        Workflow {
            id: WorkflowId::new(),
            name: "deploy".to_string(),
            job_count: 2,
            processed_count: 0,
            failed_count: 0,
            finished_jobs: HashSet::new(),
            dispatched_jobs: HashSet::new(),
            success_callback: None,
            failure_callback: None,
            status: WorkflowStatus::Running,
            created_at: chrono::Utc::now(),
            finished_at: None,
        }
    }

    fn sample_job(workflow_id: WorkflowId, step: u64, id: &str) -> JobRecord {
        JobRecord {
            workflow_id,
            step_id: StepId(step),
            job_id: JobId::new(id),
            name: id.to_string(),
            dependencies: vec![],
            dependents: vec![],
            payload: serde_json::json!({"task": id}),
        }
    }

    #[tokio::test]
    async fn test_workflow_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbWorkflowStore::new(temp_dir.path().join("store.redb")).unwrap();

        let mut workflow = sample_workflow();
        store.create_workflow(&workflow, &[]).await.unwrap();

        workflow.processed_count = 1;
        workflow.finished_jobs.insert(JobId::new("build"));
        store.update_workflow(&workflow).await.unwrap();

        let loaded = store.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.processed_count, 1);
        assert!(loaded.finished_jobs.contains(&JobId::new("build")));
        assert_eq!(loaded.status, WorkflowStatus::Running);
    }

    #[tokio::test]
    async fn test_jobs_listed_in_step_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbWorkflowStore::new(temp_dir.path().join("store.redb")).unwrap();

        let workflow = sample_workflow();
        let jobs = vec![
            sample_job(workflow.id, 2, "test"),
            sample_job(workflow.id, 1, "build"),
            sample_job(workflow.id, 3, "deploy"),
        ];
        store.create_workflow(&workflow, &jobs).await.unwrap();

        let listed = store.list_jobs(workflow.id).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|j| j.job_id.0.as_str()).collect();
        assert_eq!(ids, vec!["build", "test", "deploy"]);

        let job = store
            .get_job(workflow.id, StepId(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.job_id, JobId::new("test"));
    }

    #[tokio::test]
    async fn test_jobs_scoped_to_their_workflow() {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbWorkflowStore::new(temp_dir.path().join("store.redb")).unwrap();

        let first = sample_workflow();
        let second = sample_workflow();
        store
            .create_workflow(&first, &[sample_job(first.id, 1, "a")])
            .await
            .unwrap();
        store
            .create_workflow(&second, &[sample_job(second.id, 1, "b")])
            .await
            .unwrap();

        let jobs = store.list_jobs(first.id).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, JobId::new("a"));
    }
}
