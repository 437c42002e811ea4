//! Workflow events for persistence

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ActivityOptions, WorkflowError, WorkflowSignal};
use crate::activity::ActivityError;

/// Types of timeouts that can occur for an activity attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutType {
    /// Activity was not claimed within schedule_to_start_timeout
    ScheduleToStart,

    /// Activity did not complete within start_to_close_timeout
    StartToClose,

    /// Activity did not complete within schedule_to_close_timeout,
    /// measured from scheduling rather than from start
    ScheduleToClose,

    /// Worker did not send heartbeat within heartbeat_timeout
    Heartbeat,
}

/// Why a workflow task failed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowTaskFailureCause {
    /// The worker returned commands that don't validate against current state
    InvalidCommand { reason: String },
    /// The worker's commands diverge from what replaying the history implies
    NonDeterministic { reason: String },
    /// The worker panicked or otherwise errored while executing the task
    WorkerError { message: String },
    /// History grew past `max_history_size_events`/`max_history_size_bytes`
    HistoryTooLarge,
}

/// Events stored in the durable_workflow_events table
///
/// These events form the append-only log for a run. They are used for:
/// - Persisting workflow progress
/// - Replaying workflows after recovery
/// - Auditing and debugging
///
/// Events are immutable once written. Mutable state is reconstructed by
/// replaying all events in sequence order. `QueryRequested` is the one
/// transient kind: it is handed to the query handler but never appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    // =========================================================================
    // Workflow Lifecycle Events
    // =========================================================================
    /// Workflow was started with the given input
    WorkflowStarted {
        /// The input provided when starting the workflow
        input: serde_json::Value,
        /// Set when this run began via ContinueAsNew from a prior run
        continued_from_run_id: Option<Uuid>,
    },

    /// Workflow completed successfully
    WorkflowCompleted {
        /// The result value
        result: serde_json::Value,
    },

    /// Workflow failed with an error
    WorkflowFailed {
        /// Error details
        error: WorkflowError,
    },

    /// Workflow was cancelled (via signal or admin action)
    WorkflowCancelled {
        /// Reason for cancellation
        reason: String,
    },

    /// Workflow exceeded its run or execution timeout
    WorkflowTimedOut {
        /// Which workflow-level timeout fired
        timeout_type: WorkflowTimeoutKind,
    },

    /// Workflow closed this run and opened a new one under the same workflow_id
    WorkflowContinuedAsNew {
        /// The new run's id
        new_run_id: Uuid,
    },

    // =========================================================================
    // Workflow Task Events
    // =========================================================================
    /// A workflow task was scheduled (history has unconsumed events)
    WorkflowTaskScheduled {
        /// Hint for a sticky worker: replay from this event onward
        start_from_event_id: i64,
    },

    /// A worker claimed the scheduled workflow task
    WorkflowTaskStarted {
        /// Worker identity that claimed the task
        worker_id: String,
    },

    /// The worker's commands were validated and applied
    WorkflowTaskCompleted {
        /// Worker identity that completed the task
        worker_id: String,
    },

    /// The worker's commands failed validation, or the worker errored
    WorkflowTaskFailed {
        /// Why the task failed
        cause: WorkflowTaskFailureCause,
    },

    /// The workflow task lease expired before the worker responded
    WorkflowTaskTimedOut {
        /// Worker identity that held the lease, if any
        worker_id: Option<String>,
    },

    // =========================================================================
    // Activity Lifecycle Events
    // =========================================================================
    /// Activity was scheduled for execution
    ActivityScheduled {
        /// Unique activity identifier within the workflow
        activity_id: String,

        /// Type of activity to execute
        activity_type: String,

        /// Input for the activity
        input: serde_json::Value,

        /// Execution options
        options: ActivityOptions,
    },

    /// Activity execution started (claimed by a worker)
    ActivityStarted {
        /// Activity identifier
        activity_id: String,

        /// Current attempt number (1-based)
        attempt: u32,

        /// ID of the worker executing the activity
        worker_id: String,
    },

    /// Activity completed successfully
    ActivityCompleted {
        /// Activity identifier
        activity_id: String,

        /// Result returned by the activity
        result: serde_json::Value,
    },

    /// Activity failed (may or may not retry)
    ActivityFailed {
        /// Activity identifier
        activity_id: String,

        /// Error details
        error: ActivityError,

        /// Whether the activity will be retried
        will_retry: bool,
    },

    /// Activity timed out
    ActivityTimedOut {
        /// Activity identifier
        activity_id: String,

        /// Type of timeout that occurred
        timeout_type: TimeoutType,
    },

    /// A cancellation was requested for a running activity
    ///
    /// Cancellation is cooperative: this event only flips the flag a worker
    /// observes via heartbeat response. The activity may still complete.
    ActivityCancelRequested {
        /// Activity identifier
        activity_id: String,
    },

    /// Activity was cancelled (terminal)
    ActivityCancelled {
        /// Activity identifier
        activity_id: String,

        /// Reason for cancellation
        reason: String,
    },

    // =========================================================================
    // Timer Events
    // =========================================================================
    /// Timer was started
    TimerStarted {
        /// Timer identifier
        timer_id: String,

        /// Duration in milliseconds
        duration_ms: u64,
    },

    /// Timer fired (duration elapsed)
    TimerFired {
        /// Timer identifier
        timer_id: String,
    },

    /// Timer was cancelled
    TimerCancelled {
        /// Timer identifier
        timer_id: String,
    },

    // =========================================================================
    // Signal Events
    // =========================================================================
    /// External signal was received
    SignalReceived {
        /// The signal that was received
        signal: WorkflowSignal,
    },

    // =========================================================================
    // Update Events
    // =========================================================================
    /// An update's validator accepted the request; it is now queued for the handler
    UpdateAccepted {
        /// Update identifier
        update_id: String,
        /// Update handler name
        name: String,
        /// Update input
        input: serde_json::Value,
    },

    /// An update's validator rejected the request before any handler ran
    UpdateRejected {
        /// Update identifier
        update_id: String,
        /// Rejection reason surfaced to the caller as a PreconditionFailure
        reason: String,
    },

    /// An accepted update's handler ran to completion
    UpdateCompleted {
        /// Update identifier
        update_id: String,
        /// Handler result
        result: serde_json::Value,
    },

    // =========================================================================
    // Child Workflow Events
    // =========================================================================
    /// A child workflow was requested (command received, not yet confirmed started)
    ChildWorkflowInitiated {
        /// Stable id for this child within the parent run
        child_id: String,
        /// Type of the child workflow
        workflow_type: String,
        /// Input for the child workflow
        input: serde_json::Value,
    },

    /// Child workflow was started
    ChildWorkflowStarted {
        /// Stable id for this child within the parent run
        child_id: String,
        /// Child workflow's run id
        workflow_id: Uuid,
        /// Type of the child workflow
        workflow_type: String,
    },

    /// Child workflow completed successfully
    ChildWorkflowCompleted {
        /// Stable id for this child within the parent run
        child_id: String,
        /// Child workflow ID
        workflow_id: Uuid,
        /// Result from the child workflow
        result: serde_json::Value,
    },

    /// Child workflow failed
    ChildWorkflowFailed {
        /// Stable id for this child within the parent run
        child_id: String,
        /// Child workflow ID
        workflow_id: Uuid,
        /// Error from the child workflow
        error: WorkflowError,
    },
}

/// Which workflow-level deadline fired
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowTimeoutKind {
    /// Single run exceeded `run_timeout`
    Run,
    /// Chain of continue-as-new runs exceeded `execution_timeout`
    Execution,
    /// A single workflow task exceeded `task_timeout`
    Task,
}

impl WorkflowEvent {
    /// Get the activity_id if this is an activity-related event
    pub fn activity_id(&self) -> Option<&str> {
        match self {
            Self::ActivityScheduled { activity_id, .. }
            | Self::ActivityStarted { activity_id, .. }
            | Self::ActivityCompleted { activity_id, .. }
            | Self::ActivityFailed { activity_id, .. }
            | Self::ActivityTimedOut { activity_id, .. }
            | Self::ActivityCancelRequested { activity_id }
            | Self::ActivityCancelled { activity_id, .. } => Some(activity_id),
            _ => None,
        }
    }

    /// Check if this is a terminal workflow event (closes the run; nothing appends after)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. }
                | Self::WorkflowFailed { .. }
                | Self::WorkflowCancelled { .. }
                | Self::WorkflowTimedOut { .. }
                | Self::WorkflowContinuedAsNew { .. }
        )
    }

    /// Whether this event kind is ever transient (never persisted to history)
    pub fn is_query_marker(&self) -> bool {
        false
    }
}

/// A query request, handled in a read-only replay context and never persisted
///
/// Modeled separately from `WorkflowEvent` because `QueryRequested` per the
/// data model is transient: it is the one event kind that never reaches the
/// History Store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRequested {
    /// Query handler name
    pub name: String,
    /// Query arguments
    pub args: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workflow_event_serialization() {
        let event = WorkflowEvent::WorkflowStarted {
            input: json!({"order_id": "123"}),
            continued_from_run_id: None,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"workflow_started\""));

        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_activity_event_serialization() {
        let event = WorkflowEvent::ActivityCompleted {
            activity_id: "step-1".to_string(),
            result: json!({"status": "ok"}),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_activity_id_extraction() {
        let event = WorkflowEvent::ActivityStarted {
            activity_id: "my-activity".to_string(),
            attempt: 1,
            worker_id: "worker-1".to_string(),
        };

        assert_eq!(event.activity_id(), Some("my-activity"));

        let start_event = WorkflowEvent::WorkflowStarted {
            input: json!({}),
            continued_from_run_id: None,
        };
        assert_eq!(start_event.activity_id(), None);
    }

    #[test]
    fn test_is_terminal() {
        assert!(WorkflowEvent::WorkflowCompleted { result: json!({}) }.is_terminal());
        assert!(WorkflowEvent::WorkflowFailed {
            error: WorkflowError::new("error")
        }
        .is_terminal());
        assert!(WorkflowEvent::WorkflowCancelled {
            reason: "cancelled".to_string()
        }
        .is_terminal());
        assert!(WorkflowEvent::WorkflowContinuedAsNew {
            new_run_id: Uuid::now_v7()
        }
        .is_terminal());

        assert!(!WorkflowEvent::WorkflowStarted {
            input: json!({}),
            continued_from_run_id: None
        }
        .is_terminal());
        assert!(!WorkflowEvent::ActivityCompleted {
            activity_id: "x".to_string(),
            result: json!({})
        }
        .is_terminal());
    }

    #[test]
    fn test_continue_as_new_carries_lineage() {
        let prior = Uuid::now_v7();
        let event = WorkflowEvent::WorkflowStarted {
            input: json!({}),
            continued_from_run_id: Some(prior),
        };
        match event {
            WorkflowEvent::WorkflowStarted {
                continued_from_run_id,
                ..
            } => assert_eq!(continued_from_run_id, Some(prior)),
            _ => panic!("expected WorkflowStarted"),
        }
    }

    #[test]
    fn test_update_lifecycle_serialization() {
        let accepted = WorkflowEvent::UpdateAccepted {
            update_id: "u1".into(),
            name: "transfer".into(),
            input: json!({"amount": 5}),
        };
        let json = serde_json::to_string(&accepted).unwrap();
        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(accepted, parsed);
    }
}
