//! Workflow executor with replay support
//!
//! The `WorkflowExecutor` is responsible for:
//! - Starting new workflows
//! - Replaying workflows from event history
//! - Processing workflow actions (scheduling activities, timers, etc.)
//! - Handling signals, queries, updates, and child workflows

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::activity::ActivityError;
use crate::persistence::{
    StoreError, TaskDefinition, TraceContext, WorkflowEventStore, WorkflowStatus,
};
use crate::workflow::{
    WorkflowAction, WorkflowError, WorkflowEvent, WorkflowSignal, WorkflowTaskFailureCause,
};

use super::registry::{AnyWorkflow, RegistryError, WorkflowRegistry};
use super::state::{MutableStateCache, PendingWorkflowTask};
use super::timer::TimerService;
use crate::worker::WorkflowActivityBridge;

/// Identity used for workflow tasks processed in-process rather than
/// dispatched through the task queue matcher.
const IN_PROCESS_WORKER: &str = "in-process-executor";

/// Configuration for the workflow executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum events per workflow (for safety)
    pub max_events_per_workflow: usize,

    /// Whether to validate actions before persisting
    pub validate_actions: bool,

    /// How long a workflow task may stay in flight before a timeout sweep
    /// considers its lease expired.
    pub workflow_task_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_events_per_workflow: 10000,
            validate_actions: true,
            workflow_task_timeout: Duration::from_secs(10),
        }
    }
}

/// Errors from executor operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Workflow already completed
    #[error("workflow {0} already completed")]
    WorkflowCompleted(Uuid),

    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Replay error (non-determinism detected)
    #[error("replay error: {0}")]
    ReplayError(String),

    /// Too many events
    #[error("workflow {0} has too many events ({1} > {2})")]
    TooManyEvents(Uuid, usize, usize),

    /// Invalid action
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// Update was rejected by its validator
    #[error("update rejected: {0}")]
    UpdateRejected(String),

    /// Query or update handler isn't defined for this workflow
    #[error("handler error: {0}")]
    HandlerError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of processing a workflow
#[derive(Debug)]
pub struct ProcessResult {
    /// Whether the workflow completed
    pub completed: bool,

    /// Number of new events written
    pub events_written: usize,

    /// Number of tasks enqueued
    pub tasks_enqueued: usize,

    /// Number of signals processed
    pub signals_processed: usize,
}

fn is_closed(status: WorkflowStatus) -> bool {
    status.is_closed()
}

/// Workflow executor
///
/// The executor drives workflow state machines by replaying events and
/// processing actions. It uses optimistic concurrency control to handle
/// concurrent updates.
///
/// # Example
///
/// ```ignore
/// use durable::prelude::*;
///
/// let store = InMemoryWorkflowEventStore::new();
/// let mut executor = WorkflowExecutor::new(store);
/// executor.register::<MyWorkflow>();
///
/// // Start a new workflow
/// let workflow_id = executor.start_workflow::<MyWorkflow>(input).await?;
///
/// // Process the workflow (after activities complete)
/// executor.process_workflow(workflow_id).await?;
/// ```
pub struct WorkflowExecutor<S: WorkflowEventStore> {
    store: Arc<S>,
    registry: WorkflowRegistry,
    config: ExecutorConfig,
    state: MutableStateCache,
    timer: TimerService,
}

impl<S: WorkflowEventStore> WorkflowExecutor<S> {
    /// Create a new executor with the given store
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            registry: WorkflowRegistry::new(),
            config: ExecutorConfig::default(),
            state: MutableStateCache::default(),
            timer: TimerService::new(),
        }
    }

    /// Create a new executor with custom config
    pub fn with_config(store: S, config: ExecutorConfig) -> Self {
        Self {
            store: Arc::new(store),
            registry: WorkflowRegistry::new(),
            config,
            state: MutableStateCache::default(),
            timer: TimerService::new(),
        }
    }

    /// Register a workflow type
    pub fn register<W: crate::workflow::Workflow>(&mut self) {
        self.registry.register::<W>();
        info!(workflow_type = W::TYPE, "registered workflow type");
    }

    /// Get a reference to the store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Start a new workflow
    ///
    /// Creates the workflow instance, persists the start event, and
    /// processes initial actions.
    #[instrument(skip(self, input, trace_context), fields(workflow_type = W::TYPE))]
    pub async fn start_workflow<W: crate::workflow::Workflow>(
        &self,
        input: W::Input,
        trace_context: Option<TraceContext>,
    ) -> Result<Uuid, ExecutorError> {
        let workflow_id = Uuid::now_v7();
        let input_json = serde_json::to_value(&input)?;
        self.start_workflow_raw(workflow_id, W::TYPE, input_json, None, trace_context)
            .await?;
        Ok(workflow_id)
    }

    /// Start a new workflow by type name rather than a compile-time `Workflow` type
    ///
    /// Used by callers that only know the workflow type as a string — the
    /// Interaction API facade and anything built on top of it (CLI, HTTP).
    #[instrument(skip(self, input, trace_context))]
    pub async fn start_workflow_dynamic(
        &self,
        workflow_type: &str,
        input: serde_json::Value,
        trace_context: Option<TraceContext>,
    ) -> Result<Uuid, ExecutorError> {
        let workflow_id = Uuid::now_v7();
        self.start_workflow_raw(workflow_id, workflow_type, input, None, trace_context)
            .await?;
        Ok(workflow_id)
    }

    /// Start a new run carrying over from a prior run via continue-as-new
    #[instrument(skip(self, input))]
    pub async fn continue_as_new(
        &self,
        workflow_type: &str,
        input: serde_json::Value,
        continued_from_run_id: Uuid,
    ) -> Result<Uuid, ExecutorError> {
        let new_run_id = Uuid::now_v7();
        self.start_workflow_raw(
            new_run_id,
            workflow_type,
            input,
            Some(continued_from_run_id),
            None,
        )
        .await?;
        Ok(new_run_id)
    }

    /// Type-erased workflow start, shared by `start_workflow` and continue-as-new
    async fn start_workflow_raw(
        &self,
        workflow_id: Uuid,
        workflow_type: &str,
        input_json: serde_json::Value,
        continued_from_run_id: Option<Uuid>,
        trace_context: Option<TraceContext>,
    ) -> Result<(), ExecutorError> {
        info!(%workflow_id, workflow_type, "starting new workflow");

        self.store
            .create_workflow(
                workflow_id,
                workflow_type,
                input_json.clone(),
                trace_context.as_ref(),
            )
            .await?;

        let start_event = WorkflowEvent::WorkflowStarted {
            input: input_json.clone(),
            continued_from_run_id,
        };

        self.store
            .append_events(workflow_id, 0, vec![start_event])
            .await?;

        let mut workflow = self.registry.create(workflow_type, input_json)?;
        let actions = workflow.on_start();

        let completes_immediately = actions.iter().any(|a| {
            matches!(
                a,
                WorkflowAction::CompleteWorkflow { .. }
                    | WorkflowAction::FailWorkflow { .. }
                    | WorkflowAction::ContinueAsNew { .. }
            )
        });

        self.run_workflow_task(workflow_id, 1, actions).await?;

        if !completes_immediately {
            self.store
                .update_workflow_status(workflow_id, WorkflowStatus::Running, None, None)
                .await?;
        }

        Ok(())
    }

    /// Process a workflow after external events (activity completions, signals, etc.)
    ///
    /// This replays the workflow from its event history and processes any
    /// new actions that result from recent events.
    #[instrument(skip(self))]
    pub async fn process_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<ProcessResult, ExecutorError> {
        let _run_lock = self.state.lock(workflow_id).await;
        let workflow_info = self.store.get_workflow_info(workflow_id).await?;

        if is_closed(workflow_info.status) {
            debug!(%workflow_id, status = ?workflow_info.status, "workflow already in terminal state");
            return Ok(ProcessResult {
                completed: true,
                events_written: 0,
                tasks_enqueued: 0,
                signals_processed: 0,
            });
        }

        let events = self.store.load_events(workflow_id).await?;

        if events.is_empty() {
            return Err(ExecutorError::WorkflowNotFound(workflow_id));
        }

        if events.len() > self.config.max_events_per_workflow {
            return Err(ExecutorError::TooManyEvents(
                workflow_id,
                events.len(),
                self.config.max_events_per_workflow,
            ));
        }

        if !matches!(&events[0].1, WorkflowEvent::WorkflowStarted { .. }) {
            return Err(ExecutorError::ReplayError(
                "first event must be WorkflowStarted".to_string(),
            ));
        }

        let mut workflow = self
            .registry
            .create(&workflow_info.workflow_type, workflow_info.input.clone())?;

        let mut current_sequence = events.len() as i32;
        let mut events_written = 0;
        let mut tasks_enqueued = 0;

        for (_seq, event) in &events {
            self.replay_event(&mut *workflow, event)?;
        }

        debug!(%workflow_id, current_sequence, "replayed events");

        let signals = self.store.get_pending_signals(workflow_id).await?;
        let signals_processed = signals.len();

        for signal in &signals {
            let actions = workflow.on_signal(signal);
            let signal_event = WorkflowEvent::SignalReceived {
                signal: signal.clone(),
            };

            current_sequence = self
                .store
                .append_events(workflow_id, current_sequence, vec![signal_event])
                .await?;
            events_written += 1;

            let (new_seq, written, enqueued) = self
                .run_workflow_task(workflow_id, current_sequence, actions)
                .await?;
            current_sequence = new_seq;
            events_written += written;
            tasks_enqueued += enqueued;
        }

        if signals_processed > 0 {
            self.store
                .mark_signals_processed(workflow_id, signals_processed)
                .await?;
        }

        let completed = workflow.is_completed();
        if completed {
            if let Some(result) = workflow.result_json() {
                self.store
                    .update_workflow_status(
                        workflow_id,
                        WorkflowStatus::Completed,
                        Some(result),
                        None,
                    )
                    .await?;
            } else if let Some(error) = workflow.error() {
                self.store
                    .update_workflow_status(workflow_id, WorkflowStatus::Failed, None, Some(error))
                    .await?;
            }
            self.state.evict(workflow_id);
        } else {
            self.state.observe_sequence(workflow_id, current_sequence);
        }

        Ok(ProcessResult {
            completed,
            events_written,
            tasks_enqueued,
            signals_processed,
        })
    }

    /// Send a signal to a workflow
    #[instrument(skip(self, signal))]
    pub async fn send_signal(
        &self,
        workflow_id: Uuid,
        signal: WorkflowSignal,
    ) -> Result<(), ExecutorError> {
        let _run_lock = self.state.lock(workflow_id).await;
        let status = self.store.get_workflow_status(workflow_id).await?;

        if is_closed(status) {
            warn!(%workflow_id, ?status, "cannot send signal to completed workflow");
            return Err(ExecutorError::WorkflowCompleted(workflow_id));
        }

        self.store.send_signal(workflow_id, signal).await?;
        info!(%workflow_id, "signal sent");

        Ok(())
    }

    /// Request cancellation of a running workflow
    ///
    /// Cooperative: delivered as a cancel signal that the workflow's own
    /// `on_signal` handles, rather than an immediate status change.
    #[instrument(skip(self))]
    pub async fn cancel_workflow(
        &self,
        workflow_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<(), ExecutorError> {
        let signal = WorkflowSignal::cancel(reason)
            .with_dedup_key(format!("__cancel:{workflow_id}"));
        self.send_signal(workflow_id, signal).await
    }

    /// Forcibly terminate a workflow without involving its own logic
    ///
    /// Unlike `cancel_workflow`, no event reaches the workflow's handlers;
    /// this is an administrative action, not part of normal execution.
    #[instrument(skip(self))]
    pub async fn terminate_workflow(
        &self,
        workflow_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<(), ExecutorError> {
        let _run_lock = self.state.lock(workflow_id).await;
        let status = self.store.get_workflow_status(workflow_id).await?;
        if is_closed(status) {
            return Err(ExecutorError::WorkflowCompleted(workflow_id));
        }

        let events = self.store.load_events(workflow_id).await?;
        let sequence = events.len() as i32;

        let event = WorkflowEvent::WorkflowCancelled {
            reason: reason.into(),
        };
        self.store
            .append_events(workflow_id, sequence, vec![event])
            .await?;

        self.store
            .update_workflow_status(workflow_id, WorkflowStatus::Terminated, None, None)
            .await?;

        self.state.evict(workflow_id);
        warn!(%workflow_id, "workflow terminated");
        Ok(())
    }

    /// Answer a read-only query by replaying history without mutating it
    ///
    /// May be served on closed runs; this never appends events.
    #[instrument(skip(self, args))]
    pub async fn query_workflow(
        &self,
        workflow_id: Uuid,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ExecutorError> {
        let workflow_info = self.store.get_workflow_info(workflow_id).await?;
        let events = self.store.load_events(workflow_id).await?;

        let mut workflow = self
            .registry
            .create(&workflow_info.workflow_type, workflow_info.input.clone())?;

        for (_seq, event) in &events {
            self.replay_event(&mut *workflow, event)?;
        }

        workflow
            .on_query(name, args)
            .map_err(|e| ExecutorError::HandlerError(e.message))
    }

    /// Submit an update: validate, accept into history, then run its handler
    ///
    /// This is the two-phase update protocol: a rejecting validator never
    /// reaches history, so the caller sees a precondition failure rather than
    /// a durably recorded rejection.
    #[instrument(skip(self, input))]
    pub async fn update_workflow(
        &self,
        workflow_id: Uuid,
        update_id: &str,
        name: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ExecutorError> {
        let _run_lock = self.state.lock(workflow_id).await;
        let status = self.store.get_workflow_status(workflow_id).await?;
        if is_closed(status) {
            return Err(ExecutorError::WorkflowCompleted(workflow_id));
        }

        let workflow_info = self.store.get_workflow_info(workflow_id).await?;
        let events = self.store.load_events(workflow_id).await?;
        let mut sequence = events.len() as i32;

        let mut workflow = self
            .registry
            .create(&workflow_info.workflow_type, workflow_info.input.clone())?;
        for (_seq, event) in &events {
            self.replay_event(&mut *workflow, event)?;
        }

        if let Err(reject_reason) = workflow.validate_update(name, &input) {
            sequence = self
                .store
                .append_events(
                    workflow_id,
                    sequence,
                    vec![WorkflowEvent::UpdateRejected {
                        update_id: update_id.to_string(),
                        reason: reject_reason.message.clone(),
                    }],
                )
                .await?;
            let _ = sequence;
            return Err(ExecutorError::UpdateRejected(reject_reason.message));
        }

        sequence = self
            .store
            .append_events(
                workflow_id,
                sequence,
                vec![WorkflowEvent::UpdateAccepted {
                    update_id: update_id.to_string(),
                    name: name.to_string(),
                    input: input.clone(),
                }],
            )
            .await?;

        let actions = workflow.on_update(name, input);
        let (_new_seq, _written, _enqueued) = self
            .run_workflow_task(workflow_id, sequence, actions)
            .await?;

        let events = self.store.load_events(workflow_id).await?;
        for (_seq, event) in events.iter().rev() {
            if let WorkflowEvent::UpdateCompleted {
                update_id: completed_id,
                result,
            } = event
            {
                if completed_id == update_id {
                    return Ok(result.clone());
                }
            }
        }

        Err(ExecutorError::HandlerError(format!(
            "update {update_id} did not respond"
        )))
    }

    /// Handle activity completion
    ///
    /// Called by the worker pool when an activity completes successfully.
    #[instrument(skip(self, result))]
    pub async fn on_activity_completed(
        &self,
        workflow_id: Uuid,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Result<ProcessResult, ExecutorError> {
        {
            let _run_lock = self.state.lock(workflow_id).await;
            let events = self.store.load_events(workflow_id).await?;
            let current_sequence = events.len() as i32;

            let completion_event = WorkflowEvent::ActivityCompleted {
                activity_id: activity_id.to_string(),
                result,
            };

            self.store
                .append_events(workflow_id, current_sequence, vec![completion_event])
                .await?;
        }

        self.state.clear_pending_activity(workflow_id, activity_id);
        self.process_workflow(workflow_id).await
    }

    /// Handle activity failure
    ///
    /// Called by the worker pool when an activity fails.
    #[instrument(skip(self, error))]
    pub async fn on_activity_failed(
        &self,
        workflow_id: Uuid,
        activity_id: &str,
        error: ActivityError,
        will_retry: bool,
    ) -> Result<ProcessResult, ExecutorError> {
        {
            let _run_lock = self.state.lock(workflow_id).await;
            let events = self.store.load_events(workflow_id).await?;
            let current_sequence = events.len() as i32;

            let failure_event = WorkflowEvent::ActivityFailed {
                activity_id: activity_id.to_string(),
                error,
                will_retry,
            };

            self.store
                .append_events(workflow_id, current_sequence, vec![failure_event])
                .await?;
        }

        if !will_retry {
            self.state.clear_pending_activity(workflow_id, activity_id);
            self.process_workflow(workflow_id).await
        } else {
            Ok(ProcessResult {
                completed: false,
                events_written: 1,
                tasks_enqueued: 0,
                signals_processed: 0,
            })
        }
    }

    /// Handle timer fired
    #[instrument(skip(self))]
    pub async fn on_timer_fired(
        &self,
        workflow_id: Uuid,
        timer_id: &str,
    ) -> Result<ProcessResult, ExecutorError> {
        {
            let _run_lock = self.state.lock(workflow_id).await;
            let events = self.store.load_events(workflow_id).await?;
            let current_sequence = events.len() as i32;

            let timer_event = WorkflowEvent::TimerFired {
                timer_id: timer_id.to_string(),
            };

            self.store
                .append_events(workflow_id, current_sequence, vec![timer_event])
                .await?;
        }

        self.state.clear_pending_timer(workflow_id, timer_id);

        self.process_workflow(workflow_id).await
    }

    /// Handle a child workflow's completion, routing it back to its parent
    #[instrument(skip(self, result))]
    pub async fn on_child_workflow_completed(
        &self,
        child_workflow_id: Uuid,
        result: serde_json::Value,
    ) -> Result<Option<ProcessResult>, ExecutorError> {
        let Some((parent_id, child_id)) = self.store.get_parent_workflow(child_workflow_id).await?
        else {
            return Ok(None);
        };

        {
            let _run_lock = self.state.lock(parent_id).await;
            let events = self.store.load_events(parent_id).await?;
            let sequence = events.len() as i32;

            let event = WorkflowEvent::ChildWorkflowCompleted {
                child_id,
                workflow_id: child_workflow_id,
                result,
            };
            self.store
                .append_events(parent_id, sequence, vec![event])
                .await?;
        }

        Ok(Some(self.process_workflow(parent_id).await?))
    }

    /// Handle a child workflow's failure, routing it back to its parent
    #[instrument(skip(self, error))]
    pub async fn on_child_workflow_failed(
        &self,
        child_workflow_id: Uuid,
        error: WorkflowError,
    ) -> Result<Option<ProcessResult>, ExecutorError> {
        let Some((parent_id, child_id)) = self.store.get_parent_workflow(child_workflow_id).await?
        else {
            return Ok(None);
        };

        {
            let _run_lock = self.state.lock(parent_id).await;
            let events = self.store.load_events(parent_id).await?;
            let sequence = events.len() as i32;

            let event = WorkflowEvent::ChildWorkflowFailed {
                child_id,
                workflow_id: child_workflow_id,
                error,
            };
            self.store
                .append_events(parent_id, sequence, vec![event])
                .await?;
        }

        Ok(Some(self.process_workflow(parent_id).await?))
    }

    /// Drive due timers into their workflows
    ///
    /// Intended to be called periodically by a background loop (there is no
    /// implicit polling inside the executor itself). Each due timer is fed
    /// into `on_timer_fired` for its workflow; failures for one timer don't
    /// stop the others in the same batch.
    #[instrument(skip(self))]
    pub async fn poll_timers(&self) -> Result<usize, ExecutorError> {
        let due = self.timer.due_now();
        let fired = due.len();

        for entry in due {
            if let Err(e) = self
                .on_timer_fired(entry.workflow_id, &entry.timer_id)
                .await
            {
                error!(workflow_id = %entry.workflow_id, timer_id = %entry.timer_id, "failed to deliver fired timer: {e}");
            }
        }

        Ok(fired)
    }

    // =========================================================================
    // Internal Methods
    // =========================================================================

    /// Begin a workflow task: record that history has unconsumed events and
    /// that a worker (the in-process executor itself) has claimed them.
    async fn begin_workflow_task(
        &self,
        workflow_id: Uuid,
        sequence: i32,
    ) -> Result<i32, ExecutorError> {
        let scheduled_event = WorkflowEvent::WorkflowTaskScheduled {
            start_from_event_id: sequence as i64,
        };
        let sequence = self
            .store
            .append_events(workflow_id, sequence, vec![scheduled_event])
            .await?;

        let started_event = WorkflowEvent::WorkflowTaskStarted {
            worker_id: IN_PROCESS_WORKER.to_string(),
        };
        let sequence = self
            .store
            .append_events(workflow_id, sequence, vec![started_event])
            .await?;

        self.state.set_pending_workflow_task(
            workflow_id,
            Some(PendingWorkflowTask {
                worker_id: Some(IN_PROCESS_WORKER.to_string()),
                started_event_id: sequence,
                deadline: Instant::now() + self.config.workflow_task_timeout,
            }),
        );

        Ok(sequence)
    }

    /// Complete a workflow task after its actions were applied successfully.
    async fn complete_workflow_task(
        &self,
        workflow_id: Uuid,
        sequence: i32,
    ) -> Result<i32, ExecutorError> {
        let event = WorkflowEvent::WorkflowTaskCompleted {
            worker_id: IN_PROCESS_WORKER.to_string(),
        };
        let sequence = self
            .store
            .append_events(workflow_id, sequence, vec![event])
            .await?;
        self.state.set_pending_workflow_task(workflow_id, None);
        Ok(sequence)
    }

    /// Fail a workflow task, recording why.
    async fn fail_workflow_task(
        &self,
        workflow_id: Uuid,
        sequence: i32,
        cause: WorkflowTaskFailureCause,
    ) -> Result<i32, ExecutorError> {
        let event = WorkflowEvent::WorkflowTaskFailed { cause };
        let sequence = self
            .store
            .append_events(workflow_id, sequence, vec![event])
            .await?;
        self.state.set_pending_workflow_task(workflow_id, None);
        Ok(sequence)
    }

    /// Run a workflow task end-to-end: scheduled -> started -> (actions) -> completed/failed.
    async fn run_workflow_task(
        &self,
        workflow_id: Uuid,
        sequence: i32,
        actions: Vec<WorkflowAction>,
    ) -> Result<(i32, usize, usize), ExecutorError> {
        let mut sequence = self.begin_workflow_task(workflow_id, sequence).await?;
        let mut task_events = 2; // Scheduled + Started

        match self
            .process_actions_internal(workflow_id, sequence, actions)
            .await
        {
            Ok((new_seq, written, enqueued)) => {
                sequence = new_seq;
                sequence = self.complete_workflow_task(workflow_id, sequence).await?;
                task_events += 1;
                Ok((sequence, written + task_events, enqueued))
            }
            Err(e) => {
                let cause = match &e {
                    ExecutorError::ReplayError(reason) => WorkflowTaskFailureCause::NonDeterministic {
                        reason: reason.clone(),
                    },
                    other => WorkflowTaskFailureCause::WorkerError {
                        message: other.to_string(),
                    },
                };
                if let Err(fail_err) = self.fail_workflow_task(workflow_id, sequence, cause).await
                {
                    error!(%workflow_id, "failed to record workflow task failure: {fail_err}");
                }
                Err(e)
            }
        }
    }

    /// Replay a single event on a workflow
    fn replay_event(
        &self,
        workflow: &mut dyn AnyWorkflow,
        event: &WorkflowEvent,
    ) -> Result<(), ExecutorError> {
        match event {
            WorkflowEvent::WorkflowStarted { .. } => {
                let _actions = workflow.on_start();
            }

            WorkflowEvent::ActivityCompleted {
                activity_id,
                result,
            } => {
                let _actions = workflow.on_activity_completed(activity_id, result.clone());
            }

            WorkflowEvent::ActivityFailed {
                activity_id,
                error,
                will_retry,
            } => {
                if !will_retry {
                    let _actions = workflow.on_activity_failed(activity_id, error);
                }
            }

            WorkflowEvent::TimerFired { timer_id } => {
                let _actions = workflow.on_timer_fired(timer_id);
            }

            WorkflowEvent::SignalReceived { signal } => {
                let _actions = workflow.on_signal(signal);
            }

            WorkflowEvent::ChildWorkflowCompleted {
                child_id, result, ..
            } => {
                let _actions = workflow.on_child_completed(child_id, result.clone());
            }

            WorkflowEvent::ChildWorkflowFailed {
                child_id, error, ..
            } => {
                let _actions = workflow.on_child_failed(child_id, error);
            }

            WorkflowEvent::UpdateAccepted {
                name,
                input,
                ..
            } => {
                let _actions = workflow.on_update(name, input.clone());
            }

            // Events that don't affect workflow state during replay
            WorkflowEvent::WorkflowCompleted { .. }
            | WorkflowEvent::WorkflowFailed { .. }
            | WorkflowEvent::WorkflowCancelled { .. }
            | WorkflowEvent::WorkflowTimedOut { .. }
            | WorkflowEvent::WorkflowContinuedAsNew { .. }
            | WorkflowEvent::WorkflowTaskScheduled { .. }
            | WorkflowEvent::WorkflowTaskStarted { .. }
            | WorkflowEvent::WorkflowTaskCompleted { .. }
            | WorkflowEvent::WorkflowTaskFailed { .. }
            | WorkflowEvent::WorkflowTaskTimedOut { .. }
            | WorkflowEvent::ActivityScheduled { .. }
            | WorkflowEvent::ActivityStarted { .. }
            | WorkflowEvent::ActivityTimedOut { .. }
            | WorkflowEvent::ActivityCancelRequested { .. }
            | WorkflowEvent::ActivityCancelled { .. }
            | WorkflowEvent::TimerStarted { .. }
            | WorkflowEvent::TimerCancelled { .. }
            | WorkflowEvent::UpdateRejected { .. }
            | WorkflowEvent::UpdateCompleted { .. }
            | WorkflowEvent::ChildWorkflowInitiated { .. }
            | WorkflowEvent::ChildWorkflowStarted { .. } => {
                // Informational during replay; no handler callback for these.
            }
        }

        Ok(())
    }

    /// Internal action processing that returns detailed results
    async fn process_actions_internal(
        &self,
        workflow_id: Uuid,
        mut sequence: i32,
        actions: Vec<WorkflowAction>,
    ) -> Result<(i32, usize, usize), ExecutorError> {
        let mut events_written = 0;
        let mut tasks_enqueued = 0;

        for action in actions {
            match action {
                WorkflowAction::ScheduleActivity {
                    activity_id,
                    activity_type,
                    input,
                    options,
                } => {
                    debug!(%workflow_id, %activity_id, %activity_type, "scheduling activity");

                    if let Some(prior_type) =
                        self.state.pending_activity_type(workflow_id, &activity_id)
                    {
                        if prior_type != activity_type {
                            let reason = format!(
                                "activity_id {activity_id} was scheduled as {prior_type}, now proposed as {activity_type}"
                            );
                            return Err(ExecutorError::ReplayError(reason));
                        }
                    }

                    let event = WorkflowEvent::ActivityScheduled {
                        activity_id: activity_id.clone(),
                        activity_type: activity_type.clone(),
                        input: input.clone(),
                        options: options.clone(),
                    };

                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    events_written += 1;

                    self.state
                        .mark_activity_pending(workflow_id, activity_id.clone(), activity_type.clone());

                    let task = TaskDefinition {
                        workflow_id,
                        activity_id,
                        activity_type,
                        input,
                        options,
                    };

                    self.store.enqueue_task(task).await?;
                    tasks_enqueued += 1;
                }

                WorkflowAction::RequestActivityCancel { activity_id } => {
                    debug!(%workflow_id, %activity_id, "requesting activity cancellation");

                    if let Some(task_id) = self
                        .store
                        .get_task_id_for_activity(workflow_id, &activity_id)
                        .await?
                    {
                        self.store.request_task_cancel(task_id).await?;
                    }

                    let event = WorkflowEvent::ActivityCancelRequested { activity_id };

                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    events_written += 1;
                }

                WorkflowAction::StartTimer { timer_id, duration } => {
                    debug!(%workflow_id, %timer_id, ?duration, "starting timer");

                    let event = WorkflowEvent::TimerStarted {
                        timer_id: timer_id.clone(),
                        duration_ms: duration.as_millis() as u64,
                    };

                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    events_written += 1;

                    self.state.mark_timer_pending(workflow_id, timer_id.clone());
                    self.timer.schedule(workflow_id, timer_id, duration);
                }

                WorkflowAction::CancelTimer { timer_id } => {
                    debug!(%workflow_id, %timer_id, "cancelling timer");

                    self.timer.cancel(workflow_id, &timer_id);
                    self.state.clear_pending_timer(workflow_id, &timer_id);

                    let event = WorkflowEvent::TimerCancelled { timer_id };

                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    events_written += 1;
                }

                WorkflowAction::CompleteWorkflow { result } => {
                    info!(%workflow_id, "completing workflow");

                    let event = WorkflowEvent::WorkflowCompleted {
                        result: result.clone(),
                    };

                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    events_written += 1;

                    self.store
                        .update_workflow_status(
                            workflow_id,
                            WorkflowStatus::Completed,
                            Some(result),
                            None,
                        )
                        .await?;
                }

                WorkflowAction::FailWorkflow { error } => {
                    error!(%workflow_id, error = %error.message, "failing workflow");

                    let event = WorkflowEvent::WorkflowFailed {
                        error: error.clone(),
                    };

                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    events_written += 1;

                    self.store
                        .update_workflow_status(
                            workflow_id,
                            WorkflowStatus::Failed,
                            None,
                            Some(error),
                        )
                        .await?;
                }

                WorkflowAction::ContinueAsNew { input } => {
                    info!(%workflow_id, "continuing workflow as new");

                    let new_run_id = Uuid::now_v7();
                    let event = WorkflowEvent::WorkflowContinuedAsNew { new_run_id };

                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    events_written += 1;

                    self.store
                        .update_workflow_status(
                            workflow_id,
                            WorkflowStatus::ContinuedAsNew,
                            None,
                            None,
                        )
                        .await?;

                    let workflow_info = self.store.get_workflow_info(workflow_id).await?;
                    self.start_workflow_raw(
                        new_run_id,
                        &workflow_info.workflow_type,
                        input,
                        Some(workflow_id),
                        None,
                    )
                    .await?;
                }

                WorkflowAction::ScheduleChildWorkflow {
                    child_id,
                    workflow_type,
                    input,
                } => {
                    debug!(%workflow_id, %child_id, %workflow_type, "scheduling child workflow");

                    let event = WorkflowEvent::ChildWorkflowInitiated {
                        child_id: child_id.clone(),
                        workflow_type: workflow_type.clone(),
                        input: input.clone(),
                    };

                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    events_written += 1;

                    let child_workflow_id = Uuid::now_v7();
                    self.start_workflow_raw(
                        child_workflow_id,
                        &workflow_type,
                        input,
                        None,
                        None,
                    )
                    .await?;
                    self.store
                        .link_child_workflow(workflow_id, &child_id, child_workflow_id)
                        .await?;

                    let started_event = WorkflowEvent::ChildWorkflowStarted {
                        child_id,
                        workflow_id: child_workflow_id,
                        workflow_type,
                    };
                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![started_event])
                        .await?;
                    events_written += 1;
                }

                WorkflowAction::RequestChildCancel { child_id } => {
                    if let Some(child_workflow_id) = self
                        .store
                        .get_child_workflow(workflow_id, &child_id)
                        .await?
                    {
                        self.store
                            .send_signal(child_workflow_id, WorkflowSignal::cancel(format!(
                                "cancelled by parent {workflow_id}"
                            )))
                            .await?;
                    }
                }

                WorkflowAction::SendSignalToExternalWorkflow {
                    workflow_id: target,
                    signal,
                } => {
                    let target_id = Uuid::parse_str(&target).map_err(|e| {
                        ExecutorError::InvalidAction(format!("invalid target workflow id: {e}"))
                    })?;
                    self.store.send_signal(target_id, signal).await?;
                }

                WorkflowAction::UpsertSearchAttributes { .. } => {
                    // Indexed search attributes aren't modeled as history events;
                    // a store-side projection would consume this directly.
                }

                WorkflowAction::RespondToUpdate { update_id, result } => {
                    let event = match result {
                        Ok(value) => WorkflowEvent::UpdateCompleted {
                            update_id,
                            result: value,
                        },
                        Err(err) => WorkflowEvent::UpdateRejected {
                            update_id,
                            reason: err.message,
                        },
                    };

                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    events_written += 1;
                }

                WorkflowAction::None => {
                    // No action to process
                }
            }
        }

        Ok((sequence, events_written, tasks_enqueued))
    }
}

#[async_trait::async_trait]
impl<S: WorkflowEventStore> WorkflowActivityBridge for WorkflowExecutor<S> {
    async fn activity_completed(
        &self,
        workflow_id: Uuid,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Result<(), String> {
        self.on_activity_completed(workflow_id, activity_id, result)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn activity_failed(
        &self,
        workflow_id: Uuid,
        activity_id: &str,
        error: ActivityError,
        will_retry: bool,
    ) -> Result<(), String> {
        self.on_activity_failed(workflow_id, activity_id, error, will_retry)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryWorkflowEventStore;
    use serde::{Deserialize, Serialize};

    // Test workflow implementation
    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CounterInput {
        start: i32,
        target: i32,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct CounterOutput {
        final_value: i32,
    }

    struct CounterWorkflow {
        current: i32,
        target: i32,
        completed: bool,
        failed: bool,
        error_message: Option<String>,
    }

    impl crate::workflow::Workflow for CounterWorkflow {
        const TYPE: &'static str = "counter_workflow";
        type Input = CounterInput;
        type Output = CounterOutput;

        fn new(input: Self::Input) -> Self {
            Self {
                current: input.start,
                target: input.target,
                completed: false,
                failed: false,
                error_message: None,
            }
        }

        fn on_start(&mut self) -> Vec<WorkflowAction> {
            if self.current >= self.target {
                self.completed = true;
                vec![WorkflowAction::complete(
                    serde_json::json!({ "final_value": self.current }),
                )]
            } else {
                vec![WorkflowAction::schedule_activity(
                    format!("increment-{}", self.current),
                    "increment",
                    serde_json::json!({ "value": self.current }),
                )]
            }
        }

        fn on_activity_completed(
            &mut self,
            _activity_id: &str,
            result: serde_json::Value,
        ) -> Vec<WorkflowAction> {
            self.current = result.get("value").and_then(|v| v.as_i64()).unwrap_or(0) as i32;

            if self.current >= self.target {
                self.completed = true;
                vec![WorkflowAction::complete(
                    serde_json::json!({ "final_value": self.current }),
                )]
            } else {
                vec![WorkflowAction::schedule_activity(
                    format!("increment-{}", self.current),
                    "increment",
                    serde_json::json!({ "value": self.current }),
                )]
            }
        }

        fn on_activity_failed(
            &mut self,
            _activity_id: &str,
            error: &ActivityError,
        ) -> Vec<WorkflowAction> {
            self.failed = true;
            self.error_message = Some(error.message.clone());
            vec![WorkflowAction::fail(crate::WorkflowError::new(
                &error.message,
            ))]
        }

        fn is_completed(&self) -> bool {
            self.completed || self.failed
        }

        fn result(&self) -> Option<Self::Output> {
            if self.completed && !self.failed {
                Some(CounterOutput {
                    final_value: self.current,
                })
            } else {
                None
            }
        }

        fn error(&self) -> Option<crate::WorkflowError> {
            self.error_message.as_ref().map(crate::WorkflowError::new)
        }
    }

    #[tokio::test]
    async fn test_start_workflow() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 3,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        let status = executor
            .store()
            .get_workflow_status(workflow_id)
            .await
            .expect("should get status");

        assert_eq!(status, WorkflowStatus::Running);

        let events = executor
            .store()
            .load_events(workflow_id)
            .await
            .expect("should load events");

        assert!(matches!(events[0].1, WorkflowEvent::WorkflowStarted { .. }));
        assert!(matches!(
            events[1].1,
            WorkflowEvent::WorkflowTaskScheduled { .. }
        ));
        assert!(matches!(
            events[2].1,
            WorkflowEvent::WorkflowTaskStarted { .. }
        ));
        assert!(matches!(
            events[3].1,
            WorkflowEvent::ActivityScheduled { .. }
        ));
        assert!(events
            .iter()
            .any(|(_, e)| matches!(e, WorkflowEvent::WorkflowTaskCompleted { .. })));
    }

    #[tokio::test]
    async fn test_immediate_completion() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 5,
            target: 3,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        let status = executor
            .store()
            .get_workflow_status(workflow_id)
            .await
            .expect("should get status");

        assert_eq!(status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_activity_completion() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 2,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        let result = executor
            .on_activity_completed(
                workflow_id,
                "increment-0",
                serde_json::json!({ "value": 1 }),
            )
            .await
            .expect("should complete activity");

        assert!(!result.completed);

        let result = executor
            .on_activity_completed(
                workflow_id,
                "increment-1",
                serde_json::json!({ "value": 2 }),
            )
            .await
            .expect("should complete activity");

        assert!(result.completed);

        let status = executor
            .store()
            .get_workflow_status(workflow_id)
            .await
            .expect("should get status");

        assert_eq!(status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_activity_failure() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 5,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        let error = ActivityError::non_retryable("increment failed").with_type("INCREMENT_ERROR");
        let result = executor
            .on_activity_failed(workflow_id, "increment-0", error, false)
            .await
            .expect("should handle failure");

        assert!(result.completed);

        let status = executor
            .store()
            .get_workflow_status(workflow_id)
            .await
            .expect("should get status");

        assert_eq!(status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_signal_handling() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 10,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        let signal = WorkflowSignal::new("test_signal", serde_json::json!({ "data": "hello" }));
        executor
            .send_signal(workflow_id, signal)
            .await
            .expect("should send signal");

        let result = executor
            .process_workflow(workflow_id)
            .await
            .expect("should process");

        assert_eq!(result.signals_processed, 1);
    }

    #[tokio::test]
    async fn test_cannot_signal_completed_workflow() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 10,
            target: 5,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        let signal = WorkflowSignal::new("test", serde_json::json!({}));
        let result = executor.send_signal(workflow_id, signal).await;

        assert!(matches!(result, Err(ExecutorError::WorkflowCompleted(_))));
    }

    #[tokio::test]
    async fn test_replay_consistency() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 3,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        executor
            .on_activity_completed(
                workflow_id,
                "increment-0",
                serde_json::json!({ "value": 1 }),
            )
            .await
            .unwrap();
        executor
            .on_activity_completed(
                workflow_id,
                "increment-1",
                serde_json::json!({ "value": 2 }),
            )
            .await
            .unwrap();
        executor
            .on_activity_completed(
                workflow_id,
                "increment-2",
                serde_json::json!({ "value": 3 }),
            )
            .await
            .unwrap();

        let result = executor.process_workflow(workflow_id).await.unwrap();
        assert!(result.completed);
    }

    #[tokio::test]
    async fn test_terminate_workflow() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 10,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .unwrap();

        executor
            .terminate_workflow(workflow_id, "admin requested")
            .await
            .unwrap();

        let status = executor.store().get_workflow_status(workflow_id).await.unwrap();
        assert_eq!(status, WorkflowStatus::Terminated);

        let result = executor.terminate_workflow(workflow_id, "again").await;
        assert!(matches!(result, Err(ExecutorError::WorkflowCompleted(_))));
    }
}
