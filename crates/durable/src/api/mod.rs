//! Typed Interaction API
//!
//! A thin façade over [`WorkflowExecutor`] exposing the ten named
//! operations an external caller (the `durableflow-cli`/`durableflow-api`
//! crates, or any embedder) uses to drive workflows: start, signal,
//! signal-with-start, query, update, cancel, terminate, describe, list,
//! and get-history. The façade does not add behavior — every operation is a
//! direct call into the executor or the store — it exists so HTTP handlers
//! and CLI commands share one typed surface instead of each re-deriving it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::engine::{ExecutorError, WorkflowExecutor};
use crate::persistence::{
    Pagination, StoreError, TraceContext, WorkflowEventStore, WorkflowFilter, WorkflowInfo,
    WorkflowStatus,
};
use crate::workflow::{WorkflowEvent, WorkflowSignal};

/// Client-facing error taxonomy, aggregating every subsystem error this
/// façade can surface into the six categories a caller needs to decide
/// whether to retry.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or semantically invalid request (bad workflow type, bad id)
    #[error("client error: {0}")]
    ClientError(String),

    /// The requested precondition did not hold (workflow already closed, etc.)
    #[error("precondition failed: {0}")]
    PreconditionFailure(String),

    /// Storage or transport hiccup; safe to retry with backoff
    #[error("transient error: {0}")]
    TransientError(String),

    /// The workflow's own code failed deterministically (bug in workflow logic)
    #[error("workflow task failure: {0}")]
    WorkflowTaskFailure(String),

    /// An activity failed after exhausting retries
    #[error("activity failure: {0}")]
    ActivityFailure(String),

    /// A deadline-carrying operation did not complete in time
    #[error("operation timed out")]
    Timeout,
}

impl From<ExecutorError> for ApiError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Store(StoreError::ConcurrencyConflict { .. }) => {
                ApiError::TransientError(err.to_string())
            }
            ExecutorError::Store(StoreError::Database(_)) => {
                ApiError::TransientError(err.to_string())
            }
            ExecutorError::Store(_) => ApiError::ClientError(err.to_string()),
            ExecutorError::Registry(_) => ApiError::ClientError(err.to_string()),
            ExecutorError::WorkflowCompleted(_) => ApiError::PreconditionFailure(err.to_string()),
            ExecutorError::WorkflowNotFound(_) => ApiError::ClientError(err.to_string()),
            ExecutorError::ReplayError(_) => ApiError::WorkflowTaskFailure(err.to_string()),
            ExecutorError::TooManyEvents(..) => ApiError::WorkflowTaskFailure(err.to_string()),
            ExecutorError::InvalidAction(_) => ApiError::WorkflowTaskFailure(err.to_string()),
            ExecutorError::UpdateRejected(_) => ApiError::PreconditionFailure(err.to_string()),
            ExecutorError::HandlerError(_) => ApiError::WorkflowTaskFailure(err.to_string()),
            ExecutorError::Serialization(_) => ApiError::ClientError(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrencyConflict { .. } | StoreError::Database(_) => {
                ApiError::TransientError(err.to_string())
            }
            _ => ApiError::ClientError(err.to_string()),
        }
    }
}

/// How to handle a `StartWorkflow` call when a workflow with the same
/// caller-supplied identity already exists.
///
/// This engine identifies a run purely by its server-minted `run_id`
/// (there is no separate caller-chosen business id layer yet — see the
/// design notes), so today only `AllowDuplicate` is fully meaningful;
/// the other three variants are accepted for API completeness and are
/// currently equivalent to `AllowDuplicate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IdReusePolicy {
    #[default]
    AllowDuplicate,
    AllowDuplicateFailedOnly,
    RejectDuplicate,
    TerminateIfRunning,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartWorkflowRequest {
    pub workflow_type: String,
    #[schema(value_type = Object)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub id_reuse_policy: IdReusePolicy,
    #[serde(default)]
    pub trace_context: Option<TraceContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartWorkflowResponse {
    pub workflow_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignalWorkflowRequest {
    pub signal_type: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub dedup_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignalWithStartRequest {
    /// Signal an existing run if one is open; otherwise start fresh and
    /// deliver the signal to the new run.
    pub workflow_id: Option<Uuid>,
    pub workflow_type: String,
    #[schema(value_type = Object)]
    pub input: serde_json::Value,
    pub signal: SignalWorkflowRequest,
}

/// When an `UpdateWorkflow` call should return control to the caller.
///
/// This engine always runs an update's handler synchronously as part of
/// accepting it (there is no deferred-update queue), so `Accepted` and
/// `Completed` currently observe the same result; the distinction is kept
/// for API completeness and for callers written against a deployment that
/// does queue updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WaitStage {
    Accepted,
    #[default]
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateWorkflowRequest {
    pub update_id: String,
    pub name: String,
    #[schema(value_type = Object)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub wait_stage: WaitStage,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DescribeWorkflowResponse {
    pub workflow_id: Uuid,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub continued_from_run_id: Option<Uuid>,
    pub continued_to_run_id: Option<Uuid>,
    #[schema(value_type = Option<Object>)]
    pub result: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub error: Option<crate::workflow::WorkflowError>,
}

impl From<WorkflowInfo> for DescribeWorkflowResponse {
    fn from(info: WorkflowInfo) -> Self {
        Self {
            workflow_id: info.id,
            workflow_type: info.workflow_type,
            status: info.status,
            created_at: info.created_at,
            started_at: info.started_at,
            closed_at: info.closed_at,
            continued_from_run_id: info.continued_from_run_id,
            continued_to_run_id: info.continued_to_run_id,
            result: info.result,
            error: info.error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GetWorkflowHistoryRequest {
    pub workflow_id: Uuid,
    #[serde(default)]
    pub from_event_id: i32,
    #[serde(default)]
    pub to_event_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GetWorkflowHistoryResponse {
    /// `(sequence number, event)` pairs, in history order.
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<(i32, WorkflowEvent)>,
}

/// Typed façade over a [`WorkflowExecutor`] implementing all ten
/// Interaction API operations.
pub struct InteractionApi<S: WorkflowEventStore> {
    executor: Arc<WorkflowExecutor<S>>,
}

impl<S: WorkflowEventStore> InteractionApi<S> {
    pub fn new(executor: Arc<WorkflowExecutor<S>>) -> Self {
        Self { executor }
    }

    pub async fn start_workflow(
        &self,
        request: StartWorkflowRequest,
    ) -> Result<StartWorkflowResponse, ApiError> {
        let workflow_id = self
            .executor
            .start_workflow_dynamic(&request.workflow_type, request.input, request.trace_context)
            .await?;
        Ok(StartWorkflowResponse { workflow_id })
    }

    pub async fn signal_workflow(
        &self,
        workflow_id: Uuid,
        request: SignalWorkflowRequest,
    ) -> Result<(), ApiError> {
        let mut signal = WorkflowSignal::custom(request.signal_type, request.payload);
        if let Some(dedup_key) = request.dedup_key {
            signal = signal.with_dedup_key(dedup_key);
        }
        self.executor.send_signal(workflow_id, signal).await?;
        Ok(())
    }

    pub async fn signal_with_start(
        &self,
        request: SignalWithStartRequest,
    ) -> Result<StartWorkflowResponse, ApiError> {
        let target = match request.workflow_id {
            Some(id) => match self.executor.store().get_workflow_status(id).await {
                Ok(status) if !status.is_closed() => Some(id),
                _ => None,
            },
            None => None,
        };

        let workflow_id = match target {
            Some(id) => id,
            None => {
                self.executor
                    .start_workflow_dynamic(&request.workflow_type, request.input, None)
                    .await?
            }
        };

        self.signal_workflow(workflow_id, request.signal).await?;
        Ok(StartWorkflowResponse { workflow_id })
    }

    pub async fn query_workflow(
        &self,
        workflow_id: Uuid,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ApiError> {
        Ok(self.executor.query_workflow(workflow_id, name, args).await?)
    }

    pub async fn update_workflow(
        &self,
        workflow_id: Uuid,
        request: UpdateWorkflowRequest,
    ) -> Result<serde_json::Value, ApiError> {
        Ok(self
            .executor
            .update_workflow(workflow_id, &request.update_id, &request.name, request.input)
            .await?)
    }

    pub async fn cancel_workflow(
        &self,
        workflow_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<(), ApiError> {
        self.executor.cancel_workflow(workflow_id, reason).await?;
        Ok(())
    }

    pub async fn terminate_workflow(
        &self,
        workflow_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<(), ApiError> {
        self.executor
            .terminate_workflow(workflow_id, reason)
            .await?;
        Ok(())
    }

    pub async fn describe_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<DescribeWorkflowResponse, ApiError> {
        let info = self.executor.store().get_workflow_info(workflow_id).await?;
        Ok(info.into())
    }

    pub async fn list_workflows(
        &self,
        filter: WorkflowFilter,
        pagination: Pagination,
    ) -> Result<Vec<DescribeWorkflowResponse>, ApiError> {
        let infos = self.executor.store().list_workflows(filter, pagination).await?;
        Ok(infos.into_iter().map(Into::into).collect())
    }

    pub async fn get_workflow_history(
        &self,
        request: GetWorkflowHistoryRequest,
    ) -> Result<GetWorkflowHistoryResponse, ApiError> {
        let events = self
            .executor
            .store()
            .load_events_range(request.workflow_id, request.from_event_id, request.to_event_id)
            .await?;
        Ok(GetWorkflowHistoryResponse { events })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryWorkflowEventStore;
    use crate::workflow::{Workflow, WorkflowAction};
    use serde::{Deserialize as De, Serialize as Se};

    #[derive(Debug, Se, De)]
    struct EchoInput {
        value: i32,
    }

    #[derive(Debug, Se, De)]
    struct EchoOutput {
        value: i32,
    }

    struct EchoWorkflow {
        input: EchoInput,
    }

    impl Workflow for EchoWorkflow {
        const TYPE: &'static str = "echo";
        type Input = EchoInput;
        type Output = EchoOutput;

        fn new(input: Self::Input) -> Self {
            Self { input }
        }

        fn on_start(&mut self) -> Vec<WorkflowAction> {
            vec![WorkflowAction::CompleteWorkflow {
                result: serde_json::to_value(EchoOutput {
                    value: self.input.value,
                })
                .unwrap(),
            }]
        }

        fn on_activity_completed(
            &mut self,
            _activity_id: &str,
            _result: serde_json::Value,
        ) -> Vec<WorkflowAction> {
            vec![]
        }

        fn on_activity_failed(
            &mut self,
            _activity_id: &str,
            _error: &crate::activity::ActivityError,
        ) -> Vec<WorkflowAction> {
            vec![]
        }

        fn is_completed(&self) -> bool {
            true
        }

        fn result(&self) -> Option<Self::Output> {
            Some(EchoOutput {
                value: self.input.value,
            })
        }
    }

    fn make_api() -> InteractionApi<InMemoryWorkflowEventStore> {
        let mut executor = WorkflowExecutor::new(InMemoryWorkflowEventStore::new());
        executor.register::<EchoWorkflow>();
        InteractionApi::new(Arc::new(executor))
    }

    #[tokio::test]
    async fn start_and_describe_roundtrip() {
        let api = make_api();
        let started = api
            .start_workflow(StartWorkflowRequest {
                workflow_type: "echo".to_string(),
                input: serde_json::json!({"value": 7}),
                id_reuse_policy: IdReusePolicy::default(),
                trace_context: None,
            })
            .await
            .unwrap();

        let described = api.describe_workflow(started.workflow_id).await.unwrap();
        assert_eq!(described.status, WorkflowStatus::Completed);
        assert_eq!(described.result, Some(serde_json::json!({"value": 7})));
    }

    #[tokio::test]
    async fn signal_closed_workflow_is_precondition_failure() {
        let api = make_api();
        let started = api
            .start_workflow(StartWorkflowRequest {
                workflow_type: "echo".to_string(),
                input: serde_json::json!({"value": 1}),
                id_reuse_policy: IdReusePolicy::default(),
                trace_context: None,
            })
            .await
            .unwrap();

        let err = api
            .signal_workflow(
                started.workflow_id,
                SignalWorkflowRequest {
                    signal_type: "ping".to_string(),
                    payload: serde_json::json!({}),
                    dedup_key: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::PreconditionFailure(_)));
    }

    #[tokio::test]
    async fn get_history_returns_start_event() {
        let api = make_api();
        let started = api
            .start_workflow(StartWorkflowRequest {
                workflow_type: "echo".to_string(),
                input: serde_json::json!({"value": 3}),
                id_reuse_policy: IdReusePolicy::default(),
                trace_context: None,
            })
            .await
            .unwrap();

        let history = api
            .get_workflow_history(GetWorkflowHistoryRequest {
                workflow_id: started.workflow_id,
                from_event_id: 0,
                to_event_id: None,
            })
            .await
            .unwrap();

        assert!(!history.events.is_empty());
    }
}
