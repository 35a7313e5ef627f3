use crate::callbacks::HandlerRef;
use crate::error::WorkflowResult;
use crate::graph::DependencyGraph;
use crate::job::WorkflowJob;
use crate::types::JobId;

pub(crate) struct DefinedJob {
    pub job: Box<dyn WorkflowJob>,
    pub name: String,
}

/// Accumulates jobs, their dependencies, and terminal-callback registrations
/// for one workflow. Consumed exactly once by `WorkflowRuntime::finalize`.
///
/// Jobs are kept in insertion order; the order has no scheduling meaning but
/// makes step-id assignment deterministic.
pub struct WorkflowDefinition {
    pub(crate) name: String,
    pub(crate) jobs: Vec<DefinedJob>,
    pub(crate) graph: DependencyGraph,
    pub(crate) success_handler: Option<HandlerRef>,
    pub(crate) failure_handler: Option<HandlerRef>,
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field(
                "jobs",
                &self.jobs.iter().map(|j| j.name.as_str()).collect::<Vec<_>>(),
            )
            .field("success_handler", &self.success_handler)
            .field("failure_handler", &self.failure_handler)
            .finish_non_exhaustive()
    }
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
            graph: DependencyGraph::new(),
            success_handler: None,
            failure_handler: None,
        }
    }

    /// Add a job with the given dependencies, displayed under its own name.
    pub fn add_job<J>(&mut self, job: J, dependencies: &[JobId]) -> WorkflowResult<&mut Self>
    where
        J: WorkflowJob + 'static,
    {
        let name = job.display_name();
        self.add_job_named(job, dependencies, name)
    }

    /// Add a job under an explicit display name.
    pub fn add_job_named<J>(
        &mut self,
        job: J,
        dependencies: &[JobId],
        name: impl Into<String>,
    ) -> WorkflowResult<&mut Self>
    where
        J: WorkflowJob + 'static,
    {
        self.graph.add_job(job.id(), dependencies)?;
        self.jobs.push(DefinedJob {
            job: Box::new(job),
            name: name.into(),
        });
        Ok(self)
    }

    /// Register the handler invoked when every job finishes successfully.
    /// A second registration replaces the first.
    pub fn on_success(&mut self, handler: HandlerRef) -> &mut Self {
        self.success_handler = Some(handler);
        self
    }

    /// Register the handler invoked when the workflow fails.
    /// A second registration replaces the first.
    pub fn on_failure(&mut self, handler: HandlerRef) -> &mut Self {
        self.failure_handler = Some(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}
