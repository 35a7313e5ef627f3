//! Error types for the Trellis workflow core.

use crate::types::{JobId, WorkflowId};

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised by graph construction and the workflow runtime.
///
/// Duplicate completion/failure notifications are deliberately absent here:
/// they are idempotent no-ops, not errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Adding the edge would make a job depend on itself, directly or
    /// transitively.
    #[error("job {job} would depend on itself")]
    GraphCycle { job: JobId },

    /// A declared dependency never corresponded to a job added to the graph.
    #[error("job {job} depends on {dependency}, which was never added")]
    DependencyNotFound { job: JobId, dependency: JobId },

    /// The same job id was added twice to one definition.
    #[error("job {job} was added more than once")]
    DuplicateJob { job: JobId },

    /// An event arrived for a workflow the store does not know.
    #[error("unknown workflow {id}")]
    UnknownWorkflow { id: WorkflowId },

    /// A callback descriptor names a handler that was never registered.
    #[error("no handler registered for tag {tag:?}")]
    UnknownHandler { tag: String },

    /// A terminal callback failed during invocation. Reported to the caller
    /// of the handler registry; the runtime logs it and keeps the terminal
    /// status.
    #[error("terminal callback failed")]
    Callback {
        #[source]
        source: anyhow::Error,
    },

    /// A storage, dispatch, or codec collaborator failed.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}
