use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Unique identifier for a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a job, unique within one workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workflow-unique, strictly increasing identifier assigned to a job at
/// finalization time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub u64);

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl WorkflowStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Durable record of one workflow instance.
///
/// This is the unit of shared mutable state for scheduling: the counters,
/// the finished set, the dispatched markers, and the status are only ever
/// updated together, under the runtime's per-workflow serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    /// Fixed at finalization.
    pub job_count: usize,
    pub processed_count: usize,
    pub failed_count: usize,
    /// Jobs reported finished. Monotonically non-decreasing.
    pub finished_jobs: HashSet<JobId>,
    /// Jobs already handed to the dispatcher. A job is dispatched at most once.
    pub dispatched_jobs: HashSet<JobId>,
    /// Encoded success handler descriptor, if registered.
    pub success_callback: Option<String>,
    /// Encoded failure handler descriptor, if registered.
    pub failure_callback: Option<String>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_finished(&self, job_id: &JobId) -> bool {
        self.finished_jobs.contains(job_id)
    }

    /// Jobs not yet reported finished or failed.
    pub fn remaining_jobs(&self) -> usize {
        self.job_count
            .saturating_sub(self.processed_count + self.failed_count)
    }
}

/// Persisted stamping of one job, keyed by `(workflow_id, step_id)`.
///
/// The payload is owned by the execution layer; the core stores and forwards
/// it without interpreting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub workflow_id: WorkflowId,
    pub step_id: StepId,
    pub job_id: JobId,
    pub name: String,
    pub dependencies: Vec<JobId>,
    pub dependents: Vec<JobId>,
    pub payload: serde_json::Value,
}
