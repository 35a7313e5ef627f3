use crate::error::{WorkflowError, WorkflowResult};
use crate::types::JobId;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Dependency relation among the jobs of one workflow definition.
///
/// Edges run from a dependency to its dependent. A dependency may be named
/// before its job is added; the edge is held as pending and materialized when
/// the job arrives. Cycle detection is eager: the `add_job` call that closes
/// a cycle fails, so a bad definition is rejected at the first opportunity
/// rather than at finalization.
pub struct DependencyGraph {
    graph: DiGraph<JobId, ()>,
    node_indices: HashMap<JobId, NodeIndex>,
    /// Declared edges whose dependency has not been added yet, as
    /// `(dependent, dependency)` pairs.
    pending: Vec<(JobId, JobId)>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_indices: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Register a job and union `dependencies` into its dependency set.
    ///
    /// Re-declaring a dependency that is already present is a silent no-op
    /// (set-union semantics). Fails with [`WorkflowError::DuplicateJob`] if
    /// the job id is already registered and [`WorkflowError::GraphCycle`] if
    /// any new edge would make a job depend on itself, directly or
    /// transitively.
    pub fn add_job(&mut self, job_id: JobId, dependencies: &[JobId]) -> WorkflowResult<()> {
        if self.node_indices.contains_key(&job_id) {
            return Err(WorkflowError::DuplicateJob { job: job_id });
        }

        let node = self.graph.add_node(job_id.clone());
        self.node_indices.insert(job_id.clone(), node);

        // Materialize edges that were waiting for this job to be added.
        let waiting: Vec<(JobId, JobId)> = {
            let (ready, rest) = std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|(_, dependency)| *dependency == job_id);
            self.pending = rest;
            ready
        };
        for (dependent, _) in waiting {
            let dependent_idx = self.node_indices[&dependent];
            self.add_edge_checked(node, dependent_idx, dependent)?;
        }

        for dependency in dependencies {
            if *dependency == job_id {
                return Err(WorkflowError::GraphCycle { job: job_id });
            }
            match self.node_indices.get(dependency) {
                Some(&dependency_idx) => {
                    self.add_edge_checked(dependency_idx, node, job_id.clone())?;
                }
                None => {
                    self.pending.push((job_id.clone(), dependency.clone()));
                }
            }
        }

        Ok(())
    }

    /// Add a dependency -> dependent edge, rejecting duplicates silently and
    /// cycles eagerly.
    fn add_edge_checked(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        dependent: JobId,
    ) -> WorkflowResult<()> {
        if self.graph.contains_edge(from, to) {
            return Ok(());
        }
        let edge = self.graph.add_edge(from, to, ());
        if petgraph::algo::is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(WorkflowError::GraphCycle { job: dependent });
        }
        Ok(())
    }

    /// Verify that every declared dependency corresponds to a registered job.
    pub fn validate(&self) -> WorkflowResult<()> {
        match self.pending.first() {
            Some((dependent, dependency)) => Err(WorkflowError::DependencyNotFound {
                job: dependent.clone(),
                dependency: dependency.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Declared dependencies of a job. Unknown ids map to the empty set.
    pub fn dependencies_of(&self, job_id: &JobId) -> Vec<JobId> {
        self.neighbors(job_id, petgraph::Direction::Incoming)
    }

    /// Jobs that declared `job_id` as a dependency.
    pub fn dependents_of(&self, job_id: &JobId) -> Vec<JobId> {
        self.neighbors(job_id, petgraph::Direction::Outgoing)
    }

    fn neighbors(&self, job_id: &JobId, direction: petgraph::Direction) -> Vec<JobId> {
        match self.node_indices.get(job_id) {
            Some(&node) => self
                .graph
                .neighbors_directed(node, direction)
                .map(|n| self.graph[n].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Jobs with no dependencies: the initial release set.
    ///
    /// A job awaiting an unresolved forward-declared dependency is not a
    /// root, even though it has no incoming edges yet.
    pub fn root_jobs(&self) -> Vec<JobId> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, petgraph::Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n].clone())
            .filter(|id| !self.pending.iter().any(|(dependent, _)| dependent == id))
            .collect()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.node_indices.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
