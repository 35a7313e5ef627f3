use crate::types::{JobId, StepId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An entry in a workflow's event trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: String,
    pub workflow_id: WorkflowId,
    pub timestamp: DateTime<Utc>,
    pub kind: WorkflowEventKind,
}

impl WorkflowEvent {
    pub fn new(workflow_id: WorkflowId, kind: WorkflowEventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id,
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Everything the runtime records about a workflow's life
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEventKind {
    WorkflowStarted {
        name: String,
        job_count: usize,
    },
    JobDispatched {
        job_id: JobId,
        step_id: StepId,
    },
    JobFinished {
        job_id: JobId,
    },
    JobFailed {
        job_id: JobId,
    },
    WorkflowSucceeded,
    WorkflowFailed {
        failed_job: Option<JobId>,
    },
    WorkflowCancelled,
    CallbackFailed {
        error: String,
    },
}

/// Event trail writer trait
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event to the trail
    async fn append(&self, event: WorkflowEvent) -> anyhow::Result<()>;

    /// Get all events recorded for a workflow
    async fn workflow_events(&self, workflow_id: WorkflowId) -> anyhow::Result<Vec<WorkflowEvent>>;
}
