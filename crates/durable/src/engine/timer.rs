//! Wall-clock timer scheduling
//!
//! `TimerService` tracks every outstanding `StartTimer` across all runs and
//! tells callers which ones are due. It does not itself call back into the
//! executor — a host loop polls `due()` (or awaits `wait_next_due()`) and
//! feeds each fired entry into `WorkflowExecutor::on_timer_fired`, the same
//! way a poller feeds signals into `send_signal`.
//!
//! Timers are sharded by `workflow_id` so that scheduling and cancellation
//! across unrelated runs don't contend on a single lock. Within a shard,
//! entries are kept in a min-heap ordered by `(fire_at, sequence)` so that
//! two timers with the same fire time still fire in the order they were
//! scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

const DEFAULT_SHARDS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerLifecycle {
    Active,
    Fired,
    Cancelled,
}

/// A single scheduled timer, ready to hand to the executor once due.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TimerEntry {
    pub workflow_id: Uuid,
    pub timer_id: String,
    pub fire_at: DateTime<Utc>,
    sequence: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest fire_at sorts first.
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn shard_of(workflow_id: Uuid, shards: usize) -> usize {
    let bytes = workflow_id.as_bytes();
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash as usize) % shards
}

/// Sharded priority queue of pending workflow timers.
pub struct TimerService {
    shards: Vec<Mutex<BinaryHeap<TimerEntry>>>,
    /// Lifecycle state for idempotent cancellation (`Active -> {Fired, Cancelled}`)
    states: DashMap<(Uuid, String), TimerLifecycle>,
    sequence: AtomicU64,
}

impl TimerService {
    pub fn new() -> Self {
        Self::with_shard_count(DEFAULT_SHARDS)
    }

    pub fn with_shard_count(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(BinaryHeap::new())).collect(),
            states: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Schedule a timer to fire after `duration` from now.
    pub fn schedule(&self, workflow_id: Uuid, timer_id: impl Into<String>, duration: Duration) {
        let timer_id = timer_id.into();
        let fire_at = Utc::now()
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);

        self.states
            .insert((workflow_id, timer_id.clone()), TimerLifecycle::Active);

        let shard = shard_of(workflow_id, self.shards.len());
        self.shards[shard].lock().push(TimerEntry {
            workflow_id,
            timer_id,
            fire_at,
            sequence,
        });
    }

    /// Idempotently cancel a timer. Returns `true` if it was active and is now cancelled.
    pub fn cancel(&self, workflow_id: Uuid, timer_id: &str) -> bool {
        let key = (workflow_id, timer_id.to_string());
        match self.states.get_mut(&key) {
            Some(mut state) if *state == TimerLifecycle::Active => {
                *state = TimerLifecycle::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Pop every timer due at or before `now`, across all shards.
    ///
    /// Cancelled timers are dropped silently rather than returned; callers
    /// never see a fire for a timer they already cancelled.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<TimerEntry> {
        let mut fired = Vec::new();

        for shard in &self.shards {
            let mut heap = shard.lock();
            while let Some(top) = heap.peek() {
                if top.fire_at > now {
                    break;
                }
                let entry = heap.pop().expect("peeked entry must be present");
                let key = (entry.workflow_id, entry.timer_id.clone());
                match self.states.get(&key).map(|s| *s) {
                    Some(TimerLifecycle::Active) => {
                        self.states.insert(key, TimerLifecycle::Fired);
                        fired.push(entry);
                    }
                    _ => {
                        // Already cancelled (or somehow already fired); drop it.
                    }
                }
            }
        }

        fired
    }

    /// Convenience wrapper over `due` using the current wall-clock time.
    pub fn due_now(&self) -> Vec<TimerEntry> {
        self.due(Utc::now())
    }

    /// Number of timers tracked (active, fired, or cancelled) — for tests/metrics.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_only_due_timers() {
        let service = TimerService::new();
        let workflow_id = Uuid::now_v7();

        service.schedule(workflow_id, "t1", Duration::from_secs(0));
        service.schedule(workflow_id, "t2", Duration::from_secs(3600));

        let fired = service.due_now();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].timer_id, "t1");
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let service = TimerService::new();
        let workflow_id = Uuid::now_v7();

        service.schedule(workflow_id, "t1", Duration::from_secs(0));
        assert!(service.cancel(workflow_id, "t1"));

        let fired = service.due_now();
        assert!(fired.is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let service = TimerService::new();
        let workflow_id = Uuid::now_v7();

        service.schedule(workflow_id, "t1", Duration::from_secs(0));
        assert!(service.cancel(workflow_id, "t1"));
        assert!(!service.cancel(workflow_id, "t1"));
    }

    #[test]
    fn equal_fire_times_fire_in_schedule_order() {
        let service = TimerService::new();
        let workflow_id = Uuid::now_v7();

        service.schedule(workflow_id, "first", Duration::from_secs(0));
        service.schedule(workflow_id, "second", Duration::from_secs(0));

        let fired = service.due_now();
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].timer_id, "first");
        assert_eq!(fired[1].timer_id, "second");
    }

    #[test]
    fn unrelated_workflows_land_in_independent_shards() {
        let service = TimerService::with_shard_count(4);
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        service.schedule(a, "a1", Duration::from_secs(0));
        service.schedule(b, "b1", Duration::from_secs(0));

        let fired = service.due_now();
        assert_eq!(fired.len(), 2);
    }
}
