//! Worker protocol: task tokens and poll/respond envelopes
//!
//! This is the wire contract between a worker process and the engine. It
//! carries the same identity and per-task data the executor and task queue
//! already track internally ([`crate::persistence::ClaimedTask`],
//! [`crate::workflow::WorkflowEvent`]) packaged into the envelopes a worker
//! actually exchanges over a poll/respond loop.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::activity::ActivityError;
use crate::workflow::{QueryRequested, WorkflowAction, WorkflowEvent};

/// Which side of the task queue a token refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Workflow,
    Activity,
}

/// Opaque handle binding `(run_id, scheduled_event_id, attempt, kind)`.
///
/// Workers treat this as an opaque string; only the engine encodes and
/// decodes it. Encoded as base64 over JSON rather than a hand-rolled binary
/// layout, matching how payloads elsewhere in the engine stay
/// opaque-to-the-engine and JSON-shaped rather than custom-packed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskToken {
    pub run_id: Uuid,
    pub scheduled_event_id: i64,
    pub attempt: u32,
    pub kind: TaskKind,
}

/// Errors decoding a task token a worker handed back.
#[derive(Debug, thiserror::Error)]
pub enum TaskTokenError {
    #[error("invalid task token encoding: {0}")]
    Encoding(String),
    #[error("invalid task token payload: {0}")]
    Payload(String),
}

impl TaskToken {
    pub fn new(run_id: Uuid, scheduled_event_id: i64, attempt: u32, kind: TaskKind) -> Self {
        Self {
            run_id,
            scheduled_event_id,
            attempt,
            kind,
        }
    }

    /// Encode as the opaque string handed to workers.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("TaskToken always serializes");
        base64::engine::general_purpose::STANDARD.encode(json)
    }

    /// Decode a token a worker handed back. Never trust the fields inside
    /// without also checking them against current store state (a token
    /// encodes what the engine believed at dispatch time, not a guarantee).
    pub fn decode(encoded: &str) -> Result<Self, TaskTokenError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| TaskTokenError::Encoding(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| TaskTokenError::Payload(e.to_string()))
    }
}

/// A workflow task handed to a worker: enough history to replay, plus any
/// attached queries that arrived alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTaskEnvelope {
    pub task_token: TaskToken,
    pub workflow_id: Uuid,
    pub workflow_type: String,
    /// Event id of the last workflow task this worker (or any worker) started for this run.
    pub previous_started_event_id: i64,
    /// Event id of the `WorkflowTaskStarted` event for this task.
    pub started_event_id: i64,
    /// History needed to reconstruct state, in event-id order.
    pub history: Vec<(i32, WorkflowEvent)>,
    /// Queries piggybacked on this task so a worker can answer them without a
    /// separate round trip.
    pub queries: Vec<QueryRequested>,
}

/// An activity task handed to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityTaskEnvelope {
    pub task_token: TaskToken,
    pub workflow_id: Uuid,
    pub activity_id: String,
    pub activity_type: String,
    pub input: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub attempt: u32,
    pub max_attempts: u32,
    /// Heartbeat details recorded on a prior attempt, if this is a retry.
    pub last_heartbeat_details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondWorkflowTaskCompletedRequest {
    pub task_token: TaskToken,
    pub actions: Vec<WorkflowAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondWorkflowTaskFailedRequest {
    pub task_token: TaskToken,
    pub cause: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondActivityTaskCompletedRequest {
    pub task_token: TaskToken,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondActivityTaskFailedRequest {
    pub task_token: TaskToken,
    pub error: ActivityError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondActivityTaskCancelledRequest {
    pub task_token: TaskToken,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordActivityHeartbeatRequest {
    pub task_token: TaskToken,
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_token_roundtrips() {
        let token = TaskToken::new(Uuid::now_v7(), 42, 1, TaskKind::Activity);
        let encoded = token.encode();
        let decoded = TaskToken::decode(&encoded).unwrap();
        assert_eq!(token, decoded);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(TaskToken::decode("not valid base64!!").is_err());
        assert!(TaskToken::decode("aGVsbG8=").is_err()); // valid base64, not a token
    }
}
