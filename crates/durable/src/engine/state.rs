//! Per-run mutable state cache
//!
//! Workflow state is always derivable by replaying history from the
//! [`WorkflowEventStore`](crate::persistence::WorkflowEventStore), so this
//! cache never holds the source of truth. What it does hold is the set of
//! derived, frequently-asked-about facts that would otherwise cost a full
//! replay to answer:
//!
//! - a per-run lock so that signals, queries, updates, and workflow-task
//!   processing for the same run never execute concurrently against the
//!   store (single-writer-per-run)
//! - a small LRU-ish cache of the last known sequence number per run, so
//!   callers can skip a redundant `load_events` round trip when nothing has
//!   changed since they last looked
//! - whether a workflow task is currently in flight for the run, and since
//!   when, so a timeout sweep doesn't need to replay history to find stuck
//!   tasks
//! - which activity/timer/child ids are currently outstanding, so a freshly
//!   proposed action can be checked for non-deterministic reuse of an id
//!   without rescanning history
//! - buffered queries waiting on a workflow task in flight, and which
//!   worker (if any) is stickied to this run
//!
//! Entries are evicted lazily; eviction never blocks an in-flight lock
//! holder because the lock itself is reference-counted (`Arc`) and the map
//! entry can be dropped out from under a holder without poisoning it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::workflow::QueryRequested;

/// A workflow task currently believed to be in flight for a run.
#[derive(Debug, Clone)]
pub struct PendingWorkflowTask {
    /// Worker that claimed the task, if any has yet.
    pub worker_id: Option<String>,
    /// Event id of the `WorkflowTaskStarted` event for this task.
    pub started_event_id: i32,
    /// When the task's lease expires; past this, a sweep should time it out.
    pub deadline: Instant,
}

/// Cached bookkeeping for a single run, independent of the lock itself.
#[derive(Debug, Clone, Default)]
struct RunEntry {
    last_known_sequence: i32,
    last_touched: Option<Instant>,
    pending_workflow_task: Option<PendingWorkflowTask>,
    /// activity_id -> activity_type, for activities scheduled but not yet
    /// completed/failed. Lets a freshly proposed `ScheduleActivity` be
    /// checked for a changed type under the same id without a replay.
    pending_activities: HashMap<String, String>,
    pending_timers: HashSet<String>,
    pending_children: HashSet<String>,
    /// Signals observed but not yet folded into history, oldest first.
    pending_signals: VecDeque<Uuid>,
    buffered_queries: Vec<QueryRequested>,
    sticky_worker: Option<String>,
    run_deadline: Option<DateTime<Utc>>,
}

/// Guard held while a caller has exclusive access to a run.
///
/// Dropping the guard releases the per-run lock. The guard carries no data;
/// it exists purely to serialize callers.
pub struct RunLock {
    _guard: OwnedMutexGuard<()>,
}

/// Cache of per-run locks and derived state.
///
/// One instance is shared by a [`WorkflowExecutor`](crate::engine::WorkflowExecutor)
/// and, in a multi-process deployment, would be one instance per process —
/// the lock only protects against concurrent callers within this process;
/// cross-process mutual exclusion still comes from the store's optimistic
/// concurrency check on `append_events`.
pub struct MutableStateCache {
    runs: DashMap<Uuid, RunEntry>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    stale_after: Duration,
}

impl MutableStateCache {
    /// Create a cache whose sequence hints are considered stale after `stale_after`.
    pub fn new(stale_after: Duration) -> Self {
        Self {
            runs: DashMap::new(),
            locks: DashMap::new(),
            stale_after,
        }
    }

    /// Acquire exclusive access to a run.
    ///
    /// Blocks (asynchronously) until any other in-process caller operating
    /// on the same `workflow_id` releases its guard.
    pub async fn lock(&self, workflow_id: Uuid) -> RunLock {
        let mutex = self
            .locks
            .entry(workflow_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        RunLock { _guard: guard }
    }

    /// Record the sequence number observed after a successful append or replay.
    pub fn observe_sequence(&self, workflow_id: Uuid, sequence: i32) {
        let mut entry = self.runs.entry(workflow_id).or_default();
        entry.last_known_sequence = sequence;
        entry.last_touched = Some(Instant::now());
    }

    /// Last known sequence for a run, if cached and not stale.
    pub fn cached_sequence(&self, workflow_id: Uuid) -> Option<i32> {
        let entry = self.runs.get(&workflow_id)?;
        let last_touched = entry.last_touched?;
        if last_touched.elapsed() > self.stale_after {
            None
        } else {
            Some(entry.last_known_sequence)
        }
    }

    /// Record that a workflow task is now in flight for a run, or clear it
    /// (`None`) once it completes, fails, or times out.
    pub fn set_pending_workflow_task(&self, workflow_id: Uuid, task: Option<PendingWorkflowTask>) {
        self.runs.entry(workflow_id).or_default().pending_workflow_task = task;
    }

    /// The in-flight workflow task for a run, if any.
    pub fn pending_workflow_task(&self, workflow_id: Uuid) -> Option<PendingWorkflowTask> {
        self.runs.get(&workflow_id)?.pending_workflow_task.clone()
    }

    /// Runs with a workflow task whose lease expired before `now`.
    pub fn timed_out_workflow_tasks(&self, now: Instant) -> Vec<(Uuid, PendingWorkflowTask)> {
        self.runs
            .iter()
            .filter_map(|entry| {
                let task = entry.value().pending_workflow_task.as_ref()?;
                if task.deadline <= now {
                    Some((*entry.key(), task.clone()))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Record that `activity_id` was scheduled as `activity_type` and is now pending.
    pub fn mark_activity_pending(
        &self,
        workflow_id: Uuid,
        activity_id: impl Into<String>,
        activity_type: impl Into<String>,
    ) {
        self.runs
            .entry(workflow_id)
            .or_default()
            .pending_activities
            .insert(activity_id.into(), activity_type.into());
    }

    /// The activity type a still-pending activity_id was scheduled as, if any.
    ///
    /// Used to detect a workflow proposing a different `activity_type` for an
    /// `activity_id` it already has outstanding — the same id must always
    /// mean the same activity across replays.
    pub fn pending_activity_type(&self, workflow_id: Uuid, activity_id: &str) -> Option<String> {
        self.runs
            .get(&workflow_id)?
            .pending_activities
            .get(activity_id)
            .cloned()
    }

    /// Clear a pending activity once it completes or fails terminally.
    pub fn clear_pending_activity(&self, workflow_id: Uuid, activity_id: &str) {
        if let Some(mut entry) = self.runs.get_mut(&workflow_id) {
            entry.pending_activities.remove(activity_id);
        }
    }

    pub fn mark_timer_pending(&self, workflow_id: Uuid, timer_id: impl Into<String>) {
        self.runs.entry(workflow_id).or_default().pending_timers.insert(timer_id.into());
    }

    pub fn is_timer_pending(&self, workflow_id: Uuid, timer_id: &str) -> bool {
        self.runs
            .get(&workflow_id)
            .map(|e| e.pending_timers.contains(timer_id))
            .unwrap_or(false)
    }

    pub fn clear_pending_timer(&self, workflow_id: Uuid, timer_id: &str) {
        if let Some(mut entry) = self.runs.get_mut(&workflow_id) {
            entry.pending_timers.remove(timer_id);
        }
    }

    pub fn mark_child_pending(&self, workflow_id: Uuid, child_id: impl Into<String>) {
        self.runs.entry(workflow_id).or_default().pending_children.insert(child_id.into());
    }

    pub fn clear_pending_child(&self, workflow_id: Uuid, child_id: &str) {
        if let Some(mut entry) = self.runs.get_mut(&workflow_id) {
            entry.pending_children.remove(child_id);
        }
    }

    /// Note a signal's id as buffered for this run, ahead of it being folded
    /// into history by the next workflow task cycle.
    pub fn push_pending_signal(&self, workflow_id: Uuid, signal_id: Uuid) {
        self.runs.entry(workflow_id).or_default().pending_signals.push_back(signal_id);
    }

    /// Drain the FIFO of signal ids buffered since the last cycle.
    pub fn drain_pending_signals(&self, workflow_id: Uuid) -> Vec<Uuid> {
        match self.runs.get_mut(&workflow_id) {
            Some(mut entry) => entry.pending_signals.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Buffer a query that arrived while a workflow task was already in flight.
    pub fn buffer_query(&self, workflow_id: Uuid, query: QueryRequested) {
        self.runs.entry(workflow_id).or_default().buffered_queries.push(query);
    }

    /// Take every buffered query for a run, clearing the buffer.
    pub fn take_buffered_queries(&self, workflow_id: Uuid) -> Vec<QueryRequested> {
        match self.runs.get_mut(&workflow_id) {
            Some(mut entry) => std::mem::take(&mut entry.buffered_queries),
            None => Vec::new(),
        }
    }

    /// Stick a run to a worker so subsequent workflow tasks prefer it (cache locality).
    pub fn set_sticky_worker(&self, workflow_id: Uuid, worker_id: Option<String>) {
        self.runs.entry(workflow_id).or_default().sticky_worker = worker_id;
    }

    pub fn sticky_worker(&self, workflow_id: Uuid) -> Option<String> {
        self.runs.get(&workflow_id)?.sticky_worker.clone()
    }

    /// Record the wall-clock deadline for the run (execution/run timeout).
    pub fn set_run_deadline(&self, workflow_id: Uuid, deadline: Option<DateTime<Utc>>) {
        self.runs.entry(workflow_id).or_default().run_deadline = deadline;
    }

    pub fn run_deadline(&self, workflow_id: Uuid) -> Option<DateTime<Utc>> {
        self.runs.get(&workflow_id)?.run_deadline
    }

    /// Drop all cached state for a run (e.g. once it reaches a terminal status).
    pub fn evict(&self, workflow_id: Uuid) {
        self.runs.remove(&workflow_id);
        self.locks.remove(&workflow_id);
    }

    /// Number of runs with cached state. Exposed for tests and metrics.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl Default for MutableStateCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_serializes_same_run() {
        let cache = MutableStateCache::default();
        let workflow_id = Uuid::now_v7();

        let guard = cache.lock(workflow_id).await;
        // A second lock attempt on a different run must not block.
        let other = Uuid::now_v7();
        let _guard2 = cache.lock(other).await;
        drop(guard);
    }

    #[test]
    fn sequence_cache_roundtrip() {
        let cache = MutableStateCache::default();
        let workflow_id = Uuid::now_v7();
        assert_eq!(cache.cached_sequence(workflow_id), None);

        cache.observe_sequence(workflow_id, 5);
        assert_eq!(cache.cached_sequence(workflow_id), Some(5));

        cache.evict(workflow_id);
        assert_eq!(cache.cached_sequence(workflow_id), None);
    }

    #[test]
    fn stale_sequence_is_not_returned() {
        let cache = MutableStateCache::new(Duration::from_millis(0));
        let workflow_id = Uuid::now_v7();
        cache.observe_sequence(workflow_id, 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.cached_sequence(workflow_id), None);
    }

    #[test]
    fn pending_workflow_task_roundtrip() {
        let cache = MutableStateCache::default();
        let workflow_id = Uuid::now_v7();
        assert!(cache.pending_workflow_task(workflow_id).is_none());

        cache.set_pending_workflow_task(
            workflow_id,
            Some(PendingWorkflowTask {
                worker_id: Some("w1".into()),
                started_event_id: 3,
                deadline: Instant::now() + Duration::from_secs(10),
            }),
        );
        let task = cache.pending_workflow_task(workflow_id).unwrap();
        assert_eq!(task.started_event_id, 3);

        cache.set_pending_workflow_task(workflow_id, None);
        assert!(cache.pending_workflow_task(workflow_id).is_none());
    }

    #[test]
    fn pending_activity_type_detects_mismatch() {
        let cache = MutableStateCache::default();
        let workflow_id = Uuid::now_v7();

        cache.mark_activity_pending(workflow_id, "step-1", "send_email");
        assert_eq!(
            cache.pending_activity_type(workflow_id, "step-1"),
            Some("send_email".to_string())
        );

        cache.clear_pending_activity(workflow_id, "step-1");
        assert!(cache.pending_activity_type(workflow_id, "step-1").is_none());
    }

    #[test]
    fn timed_out_workflow_tasks_finds_expired_entries() {
        let cache = MutableStateCache::default();
        let workflow_id = Uuid::now_v7();
        let past_deadline = Instant::now();

        cache.set_pending_workflow_task(
            workflow_id,
            Some(PendingWorkflowTask {
                worker_id: None,
                started_event_id: 1,
                deadline: past_deadline,
            }),
        );

        std::thread::sleep(Duration::from_millis(5));
        let expired = cache.timed_out_workflow_tasks(Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, workflow_id);
    }
}
