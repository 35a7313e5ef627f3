use crate::types::JobRecord;
use anyhow::Result;

/// Hands a released job to the execution layer.
///
/// Dispatch is fire-and-forget: the dispatcher causes the job to eventually
/// run and the execution layer later reports back through
/// `WorkflowRuntime::on_job_finished` / `on_job_failed`. Retries of the
/// underlying execution are the dispatcher's concern; the runtime only
/// guarantees that each job is dispatched at most once and tolerates
/// duplicate notifications.
#[async_trait::async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: &JobRecord) -> Result<()>;
}
