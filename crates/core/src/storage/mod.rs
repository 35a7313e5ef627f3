pub mod event_log;
pub mod memory;
pub mod redb_store;

pub use event_log::{InMemoryEventLog, JsonlEventLog};
pub use memory::MemoryWorkflowStore;
pub use redb_store::RedbWorkflowStore;

use crate::types::{JobRecord, StepId, Workflow, WorkflowId};
use anyhow::Result;

/// Persistence collaborator for workflow and job records.
///
/// `create_workflow` is the single atomic step behind finalization: the
/// workflow record and every job record become visible together or not at
/// all. Workflow records are never deleted by the core; archival belongs to
/// the embedder.
#[async_trait::async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Atomically persist a new workflow record together with all of its
    /// job records.
    async fn create_workflow(&self, workflow: &Workflow, jobs: &[JobRecord]) -> Result<()>;

    /// Replace the stored workflow record.
    async fn update_workflow(&self, workflow: &Workflow) -> Result<()>;

    async fn get_workflow(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>>;

    /// Job records for a workflow, ordered by step id.
    async fn list_jobs(&self, workflow_id: WorkflowId) -> Result<Vec<JobRecord>>;

    async fn get_job(&self, workflow_id: WorkflowId, step_id: StepId)
        -> Result<Option<JobRecord>>;
}
