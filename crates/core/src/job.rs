use crate::types::{JobId, JobRecord, StepId, WorkflowId};
use serde::{Deserialize, Serialize};

/// Resolved placement of a job within a finalized workflow.
///
/// Written onto the job exactly once, by `WorkflowRuntime::finalize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStamp {
    pub workflow_id: WorkflowId,
    pub step_id: StepId,
    pub dependencies: Vec<JobId>,
    pub dependents: Vec<JobId>,
}

/// Capability set every job variant must expose to the core.
///
/// Concrete job types carry whatever execution payload their runner needs;
/// the core only reads the identifier and display name, stamps the job at
/// finalization, and forwards the payload untouched.
pub trait WorkflowJob: Send + Sync {
    /// Identifier, unique within one workflow definition.
    fn id(&self) -> JobId;

    /// Human-readable name. Defaults to the identifier.
    fn display_name(&self) -> String {
        self.id().0
    }

    /// Opaque execution payload, persisted and handed to the dispatcher
    /// without interpretation.
    fn payload(&self) -> serde_json::Value;

    /// Store the placement computed at finalization.
    fn stamp(&mut self, stamp: JobStamp);

    /// The placement, if the job has been finalized.
    fn stamp_ref(&self) -> Option<&JobStamp>;
}

/// Build the persistence record for a stamped job.
pub(crate) fn record_for(job: &dyn WorkflowJob, name: &str, stamp: &JobStamp) -> JobRecord {
    JobRecord {
        workflow_id: stamp.workflow_id,
        step_id: stamp.step_id,
        job_id: job.id(),
        name: name.to_string(),
        dependencies: stamp.dependencies.clone(),
        dependents: stamp.dependents.clone(),
        payload: job.payload(),
    }
}

/// Minimal job carrying a JSON payload. Convenient for embedders whose
/// execution layer is driven entirely by the payload, and for tests.
#[derive(Debug, Clone)]
pub struct PayloadJob {
    id: JobId,
    payload: serde_json::Value,
    stamp: Option<JobStamp>,
}

impl PayloadJob {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: JobId::new(id),
            payload,
            stamp: None,
        }
    }
}

impl WorkflowJob for PayloadJob {
    fn id(&self) -> JobId {
        self.id.clone()
    }

    fn payload(&self) -> serde_json::Value {
        self.payload.clone()
    }

    fn stamp(&mut self, stamp: JobStamp) {
        self.stamp = Some(stamp);
    }

    fn stamp_ref(&self) -> Option<&JobStamp> {
        self.stamp.as_ref()
    }
}
