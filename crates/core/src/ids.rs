use crate::types::StepId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Mints workflow-unique, strictly increasing step identifiers.
///
/// The runtime draws ids in job-insertion order during finalization, so the
/// only requirement on implementations is that successive calls return
/// strictly larger values.
pub trait StepIdGenerator: Send + Sync {
    fn next_step_id(&self) -> StepId;
}

/// Default generator: a plain counter starting at 1.
pub struct SequentialStepIds {
    next: AtomicU64,
}

impl SequentialStepIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialStepIds {
    fn default() -> Self {
        Self::new()
    }
}

impl StepIdGenerator for SequentialStepIds {
    fn next_step_id(&self) -> StepId {
        StepId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
