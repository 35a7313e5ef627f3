use crate::builder::WorkflowDefinition;
use crate::callbacks::{CallbackCodec, HandlerRegistry, JsonCallbackCodec, WorkflowOutcome};
use crate::dispatch::JobDispatcher;
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::{EventLog, WorkflowEvent, WorkflowEventKind};
use crate::ids::{SequentialStepIds, StepIdGenerator};
use crate::job::{record_for, JobStamp};
use crate::storage::{InMemoryEventLog, WorkflowStore};
use crate::types::{JobId, JobRecord, Workflow, WorkflowId, WorkflowStatus};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// The workflow state machine.
///
/// Finalizes definitions into running workflows and consumes the
/// completion/failure notifications pushed in by the execution layer,
/// releasing newly-eligible jobs and firing the terminal callback exactly
/// once. All collaborators sit behind traits; the runtime itself never runs
/// a job.
///
/// Every notification is processed under a per-workflow lock, and the
/// updated record is committed before any newly-eligible job is dispatched.
/// A dispatch attempt that fails has its marker rolled back, so redelivering
/// the notification that triggered it releases the job again.
pub struct WorkflowRuntime {
    store: Arc<dyn WorkflowStore>,
    dispatcher: Arc<dyn JobDispatcher>,
    registry: Arc<HandlerRegistry>,
    codec: Arc<dyn CallbackCodec>,
    event_log: Arc<dyn EventLog>,
    step_ids: Arc<dyn StepIdGenerator>,
    // Serializes event processing per workflow instance.
    locks: Mutex<HashMap<WorkflowId, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkflowRuntime {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            registry,
            codec: Arc::new(JsonCallbackCodec),
            event_log: Arc::new(InMemoryEventLog::new()),
            step_ids: Arc::new(SequentialStepIds::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn CallbackCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_event_log(mut self, event_log: Arc<dyn EventLog>) -> Self {
        self.event_log = event_log;
        self
    }

    pub fn with_step_ids(mut self, step_ids: Arc<dyn StepIdGenerator>) -> Self {
        self.step_ids = step_ids;
        self
    }

    /// Turn a definition into a running workflow.
    ///
    /// Validates the dependency graph, stamps every job with its workflow
    /// id, step id, and resolved dependency/dependent sets, persists the
    /// workflow record together with all job records in one atomic store
    /// call, and then dispatches the root jobs. If persistence fails nothing
    /// is externally observable.
    pub async fn finalize(&self, mut definition: WorkflowDefinition) -> WorkflowResult<Workflow> {
        definition.graph.validate()?;

        let workflow_id = WorkflowId::new();
        let success_callback = self.encode_handler(&definition.success_handler)?;
        let failure_callback = self.encode_handler(&definition.failure_handler)?;

        let mut workflow = Workflow {
            id: workflow_id,
            name: definition.name.clone(),
            job_count: definition.jobs.len(),
            processed_count: 0,
            failed_count: 0,
            finished_jobs: HashSet::new(),
            dispatched_jobs: HashSet::new(),
            success_callback,
            failure_callback,
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
        };

        // Step ids are assigned in insertion order, so a definition always
        // finalizes to the same stamping.
        let mut records = Vec::with_capacity(definition.jobs.len());
        for defined in &mut definition.jobs {
            let job_id = defined.job.id();
            let stamp = JobStamp {
                workflow_id,
                step_id: self.step_ids.next_step_id(),
                dependencies: definition.graph.dependencies_of(&job_id),
                dependents: definition.graph.dependents_of(&job_id),
            };
            defined.job.stamp(stamp.clone());
            records.push(record_for(defined.job.as_ref(), &defined.name, &stamp));
        }

        let roots = definition.graph.root_jobs();
        workflow.dispatched_jobs = roots.iter().cloned().collect();
        workflow.status = WorkflowStatus::Running;

        // A workflow with no jobs has nothing left to wait for.
        let empty = workflow.job_count == 0;
        if empty {
            workflow.status = WorkflowStatus::Succeeded;
            workflow.finished_at = Some(Utc::now());
        }

        self.store.create_workflow(&workflow, &records).await?;

        tracing::info!(
            "Workflow started: id={}, name={}, jobs={}",
            workflow.id,
            workflow.name,
            workflow.job_count
        );
        self.record_event(
            workflow_id,
            WorkflowEventKind::WorkflowStarted {
                name: workflow.name.clone(),
                job_count: workflow.job_count,
            },
        )
        .await;

        if empty {
            self.record_event(workflow_id, WorkflowEventKind::WorkflowSucceeded)
                .await;
            self.invoke_terminal_callback(&workflow, workflow.success_callback.clone())
                .await;
            return Ok(workflow);
        }

        let by_id: HashMap<&JobId, &JobRecord> =
            records.iter().map(|r| (&r.job_id, r)).collect();
        let root_records: Vec<&JobRecord> = roots.iter().map(|root| by_id[root]).collect();
        self.dispatch_released(&mut workflow, &root_records).await?;

        Ok(workflow)
    }

    /// Handle a completion notification from the execution layer.
    ///
    /// Deliveries after the workflow reached a terminal state are silent
    /// no-ops, and a duplicate delivery never double-counts. Dependents
    /// whose dependency sets are now fully finished are dispatched, each at
    /// most once; a dependent whose earlier dispatch attempt failed is no
    /// longer marked, so a duplicate delivery releases it again. When the
    /// last job finishes the workflow transitions to Succeeded and the
    /// success callback fires.
    pub async fn on_job_finished(
        &self,
        workflow_id: WorkflowId,
        job_id: JobId,
    ) -> WorkflowResult<()> {
        let lock = self.workflow_lock(workflow_id);
        let _guard = lock.lock().await;

        let mut workflow = match self.load_workflow(workflow_id).await {
            Ok(workflow) => workflow,
            Err(e) => {
                self.drop_lock(&workflow_id);
                return Err(e);
            }
        };
        if workflow.is_terminal() {
            tracing::debug!(
                "Ignoring finish notification for terminal workflow: workflow={}, job={}",
                workflow_id,
                job_id
            );
            self.drop_lock(&workflow_id);
            return Ok(());
        }

        let jobs = self.store.list_jobs(workflow_id).await?;
        let by_id: HashMap<&JobId, &JobRecord> = jobs.iter().map(|r| (&r.job_id, r)).collect();
        let Some(&finished) = by_id.get(&job_id) else {
            tracing::warn!(
                "Finish notification for unknown job: workflow={}, job={}",
                workflow_id,
                job_id
            );
            return Ok(());
        };

        let duplicate = workflow.is_finished(&job_id);
        if !duplicate {
            workflow.finished_jobs.insert(job_id.clone());
            workflow.processed_count += 1;
        }

        // Release every dependent whose dependencies are all finished now.
        // The dispatched marker keeps a job from being released twice when
        // several of its dependencies finish close together; a marker rolled
        // back by a failed dispatch attempt makes its job eligible here
        // again on redelivery.
        let mut eligible: Vec<&JobRecord> = Vec::new();
        for dependent_id in &finished.dependents {
            if workflow.dispatched_jobs.contains(dependent_id) {
                continue;
            }
            let Some(&dependent) = by_id.get(dependent_id) else {
                continue;
            };
            if dependent
                .dependencies
                .iter()
                .all(|dep| workflow.finished_jobs.contains(dep))
            {
                workflow.dispatched_jobs.insert(dependent_id.clone());
                eligible.push(dependent);
            }
        }

        if duplicate && eligible.is_empty() {
            tracing::debug!(
                "Ignoring duplicate finish notification: workflow={}, job={}",
                workflow_id,
                job_id
            );
            return Ok(());
        }

        let succeeded = workflow.processed_count == workflow.job_count;
        if succeeded {
            workflow.status = WorkflowStatus::Succeeded;
            workflow.finished_at = Some(Utc::now());
        }

        // Commit before dispatch: a job must never run against bookkeeping
        // that could be rolled back.
        self.store.update_workflow(&workflow).await?;

        if !duplicate {
            self.record_event(
                workflow_id,
                WorkflowEventKind::JobFinished {
                    job_id: job_id.clone(),
                },
            )
            .await;
        }

        self.dispatch_released(&mut workflow, &eligible).await?;

        if succeeded {
            tracing::info!(
                "Workflow succeeded: id={}, jobs={}",
                workflow_id,
                workflow.job_count
            );
            self.record_event(workflow_id, WorkflowEventKind::WorkflowSucceeded)
                .await;
            self.drop_lock(&workflow_id);
            self.invoke_terminal_callback(&workflow, workflow.success_callback.clone())
                .await;
        }

        Ok(())
    }

    /// Handle a failure notification from the execution layer.
    ///
    /// The workflow transitions to Failed, the failure callback fires once,
    /// and nothing is ever dispatched again. Jobs dispatched earlier keep
    /// running; their notifications land in the terminal no-op guard.
    pub async fn on_job_failed(
        &self,
        workflow_id: WorkflowId,
        job_id: JobId,
    ) -> WorkflowResult<()> {
        let lock = self.workflow_lock(workflow_id);
        let _guard = lock.lock().await;

        let mut workflow = match self.load_workflow(workflow_id).await {
            Ok(workflow) => workflow,
            Err(e) => {
                self.drop_lock(&workflow_id);
                return Err(e);
            }
        };
        if workflow.is_terminal() {
            tracing::debug!(
                "Ignoring failure notification for terminal workflow: workflow={}, job={}",
                workflow_id,
                job_id
            );
            self.drop_lock(&workflow_id);
            return Ok(());
        }

        // A failure naming a job this workflow never had must not kill a
        // healthy workflow.
        let jobs = self.store.list_jobs(workflow_id).await?;
        if !jobs.iter().any(|record| record.job_id == job_id) {
            tracing::warn!(
                "Failure notification for unknown job: workflow={}, job={}",
                workflow_id,
                job_id
            );
            return Ok(());
        }

        workflow.failed_count += 1;
        workflow.status = WorkflowStatus::Failed;
        workflow.finished_at = Some(Utc::now());

        self.store.update_workflow(&workflow).await?;

        tracing::warn!("Workflow failed: id={}, failed job={}", workflow_id, job_id);
        self.record_event(
            workflow_id,
            WorkflowEventKind::JobFailed {
                job_id: job_id.clone(),
            },
        )
        .await;
        self.record_event(
            workflow_id,
            WorkflowEventKind::WorkflowFailed {
                failed_job: Some(job_id),
            },
        )
        .await;

        self.drop_lock(&workflow_id);
        self.invoke_terminal_callback(&workflow, workflow.failure_callback.clone())
            .await;

        Ok(())
    }

    /// Cancel a running workflow: a terminal failure injected like any other
    /// event. Releases nothing and fires the failure callback. No-op on a
    /// workflow that is already terminal.
    pub async fn cancel(&self, workflow_id: WorkflowId) -> WorkflowResult<()> {
        let lock = self.workflow_lock(workflow_id);
        let _guard = lock.lock().await;

        let mut workflow = match self.load_workflow(workflow_id).await {
            Ok(workflow) => workflow,
            Err(e) => {
                self.drop_lock(&workflow_id);
                return Err(e);
            }
        };
        if workflow.is_terminal() {
            self.drop_lock(&workflow_id);
            return Ok(());
        }

        workflow.status = WorkflowStatus::Failed;
        workflow.finished_at = Some(Utc::now());

        self.store.update_workflow(&workflow).await?;

        tracing::info!("Workflow cancelled: id={}", workflow_id);
        self.record_event(workflow_id, WorkflowEventKind::WorkflowCancelled)
            .await;

        self.drop_lock(&workflow_id);
        self.invoke_terminal_callback(&workflow, workflow.failure_callback.clone())
            .await;

        Ok(())
    }

    /// Current record for a workflow, if it exists.
    pub async fn workflow(&self, workflow_id: WorkflowId) -> WorkflowResult<Option<Workflow>> {
        Ok(self.store.get_workflow(workflow_id).await?)
    }

    /// Persisted job records for a workflow, in step order.
    pub async fn jobs(&self, workflow_id: WorkflowId) -> WorkflowResult<Vec<JobRecord>> {
        Ok(self.store.list_jobs(workflow_id).await?)
    }

    fn workflow_lock(&self, workflow_id: WorkflowId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(workflow_id)
            .or_default()
            .clone()
    }

    /// Lock entries are dropped once a workflow can no longer make progress,
    /// so straggling or misaddressed notifications do not grow the map.
    fn drop_lock(&self, workflow_id: &WorkflowId) {
        self.locks.lock().unwrap().remove(workflow_id);
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    /// Dispatch released jobs in order. If an attempt fails, the markers of
    /// the failed job and of every job not yet attempted are rolled back and
    /// re-persisted, so a redelivery of the triggering notification can
    /// release them again; the error is then surfaced to the in-flight
    /// event.
    async fn dispatch_released(
        &self,
        workflow: &mut Workflow,
        released: &[&JobRecord],
    ) -> WorkflowResult<()> {
        for (attempted, record) in released.iter().enumerate() {
            if let Err(e) = self.dispatch_job(record).await {
                for stalled in &released[attempted..] {
                    workflow.dispatched_jobs.remove(&stalled.job_id);
                }
                self.store.update_workflow(workflow).await?;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn load_workflow(&self, workflow_id: WorkflowId) -> WorkflowResult<Workflow> {
        self.store
            .get_workflow(workflow_id)
            .await?
            .ok_or(WorkflowError::UnknownWorkflow { id: workflow_id })
    }

    fn encode_handler(
        &self,
        handler: &Option<crate::callbacks::HandlerRef>,
    ) -> WorkflowResult<Option<String>> {
        match handler {
            Some(handler_ref) => Ok(Some(self.codec.encode(handler_ref)?)),
            None => Ok(None),
        }
    }

    async fn dispatch_job(&self, record: &JobRecord) -> WorkflowResult<()> {
        tracing::debug!(
            "Dispatching job: workflow={}, job={}, step={}",
            record.workflow_id,
            record.job_id,
            record.step_id
        );
        self.dispatcher.dispatch(record).await?;
        self.record_event(
            record.workflow_id,
            WorkflowEventKind::JobDispatched {
                job_id: record.job_id.clone(),
                step_id: record.step_id,
            },
        )
        .await;
        Ok(())
    }

    /// Decode and invoke a terminal callback. Failures are reported, never
    /// propagated: the scheduling outcome of a workflow does not depend on
    /// its callback.
    async fn invoke_terminal_callback(&self, workflow: &Workflow, encoded: Option<String>) {
        let Some(encoded) = encoded else {
            return;
        };

        let outcome = WorkflowOutcome {
            workflow_id: workflow.id,
            name: workflow.name.clone(),
            status: workflow.status,
            processed_count: workflow.processed_count,
            failed_count: workflow.failed_count,
        };

        let result = self
            .codec
            .decode(&encoded)
            .map_err(WorkflowError::from)
            .and_then(|handler_ref| self.registry.invoke(&handler_ref, outcome));

        if let Err(e) = result {
            tracing::error!(
                "Terminal callback failed: workflow={}, error={}",
                workflow.id,
                e
            );
            self.record_event(
                workflow.id,
                WorkflowEventKind::CallbackFailed {
                    error: e.to_string(),
                },
            )
            .await;
        }
    }

    /// Event-trail writes never fail the scheduling path.
    async fn record_event(&self, workflow_id: WorkflowId, kind: WorkflowEventKind) {
        let event = WorkflowEvent::new(workflow_id, kind);
        if let Err(e) = self.event_log.append(event).await {
            tracing::warn!(
                "Failed to append workflow event: workflow={}, error={}",
                workflow_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::HandlerRef;
    use crate::job::PayloadJob;
    use crate::storage::MemoryWorkflowStore;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullDispatcher;

    #[async_trait::async_trait]
    impl JobDispatcher for NullDispatcher {
        async fn dispatch(&self, _job: &JobRecord) -> Result<()> {
            Ok(())
        }
    }

    fn runtime() -> (WorkflowRuntime, Arc<HandlerRegistry>) {
        let registry = Arc::new(HandlerRegistry::new());
        let runtime = WorkflowRuntime::new(
            Arc::new(MemoryWorkflowStore::new()),
            Arc::new(NullDispatcher),
            registry.clone(),
        );
        (runtime, registry)
    }

    #[tokio::test]
    async fn test_empty_workflow_succeeds_immediately() {
        let (runtime, registry) = runtime();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_handler = calls.clone();
        registry.register("done", move |outcome, _| {
            assert_eq!(outcome.status, WorkflowStatus::Succeeded);
            calls_in_handler.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut definition = WorkflowDefinition::new("empty");
        definition.on_success(HandlerRef::new("done", serde_json::Value::Null));

        let workflow = runtime.finalize(definition).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_notification_for_unknown_workflow_errors() {
        let (runtime, _) = runtime();
        let err = runtime
            .on_job_finished(WorkflowId::new(), JobId::new("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownWorkflow { .. }));
    }

    #[tokio::test]
    async fn test_unknown_job_notification_is_ignored() {
        let (runtime, _) = runtime();
        let mut definition = WorkflowDefinition::new("one");
        definition
            .add_job(PayloadJob::new("a", serde_json::json!({})), &[])
            .unwrap();
        let workflow = runtime.finalize(definition).await.unwrap();

        runtime
            .on_job_finished(workflow.id, JobId::new("phantom"))
            .await
            .unwrap();

        let current = runtime.workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(current.processed_count, 0);
        assert_eq!(current.status, WorkflowStatus::Running);
    }

    #[tokio::test]
    async fn test_unknown_job_failure_is_ignored() {
        let (runtime, registry) = runtime();
        let failures = Arc::new(AtomicUsize::new(0));
        let failures_in_handler = failures.clone();
        registry.register("failed", move |_, _| {
            failures_in_handler.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut definition = WorkflowDefinition::new("one");
        definition
            .add_job(PayloadJob::new("a", serde_json::json!({})), &[])
            .unwrap();
        definition.on_failure(HandlerRef::new("failed", serde_json::Value::Null));
        let workflow = runtime.finalize(definition).await.unwrap();

        runtime
            .on_job_failed(workflow.id, JobId::new("phantom"))
            .await
            .unwrap();

        let current = runtime.workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(current.status, WorkflowStatus::Running);
        assert_eq!(current.failed_count, 0);
        assert_eq!(failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lock_entries_dropped_for_terminal_and_unknown_workflows() {
        let (runtime, _) = runtime();
        let mut definition = WorkflowDefinition::new("one");
        definition
            .add_job(PayloadJob::new("a", serde_json::json!({})), &[])
            .unwrap();
        let workflow = runtime.finalize(definition).await.unwrap();

        runtime
            .on_job_finished(workflow.id, JobId::new("a"))
            .await
            .unwrap();
        assert_eq!(runtime.lock_count(), 0);

        // Stragglers on a terminal workflow and events for workflows the
        // store never saw must not leave entries behind.
        runtime
            .on_job_finished(workflow.id, JobId::new("a"))
            .await
            .unwrap();
        assert_eq!(runtime.lock_count(), 0);

        let unknown = runtime
            .on_job_failed(WorkflowId::new(), JobId::new("a"))
            .await;
        assert!(unknown.is_err());
        assert_eq!(runtime.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_step_ids_assigned_in_insertion_order() {
        let (runtime, _) = runtime();
        let mut definition = WorkflowDefinition::new("ordered");
        definition
            .add_job(PayloadJob::new("first", serde_json::json!({})), &[])
            .unwrap();
        definition
            .add_job(PayloadJob::new("second", serde_json::json!({})), &[])
            .unwrap();
        definition
            .add_job(PayloadJob::new("third", serde_json::json!({})), &[])
            .unwrap();

        let workflow = runtime.finalize(definition).await.unwrap();
        let jobs = runtime.jobs(workflow.id).await.unwrap();

        let ids: Vec<&str> = jobs.iter().map(|j| j.job_id.0.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
        assert!(jobs.windows(2).all(|w| w[0].step_id < w[1].step_id));
    }
}
