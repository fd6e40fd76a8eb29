//! Cumulative executor statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every batch run on one executor.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    pub batches_succeeded: AtomicU64,
    pub batches_failed: AtomicU64,
    pub tasks_spawned: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_aborted: AtomicU64,
    pub tasks_faulted: AtomicU64,
    pub results_emitted: AtomicU64,
    pub fault_results_emitted: AtomicU64,
    pub dropped_faults: AtomicU64,
}

impl ExecutorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, success: bool) {
        if success {
            self.batches_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.batches_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_spawn(&self) {
        self.tasks_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, results: u64) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.results_emitted.fetch_add(results, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.tasks_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_faulted(&self) {
        self.tasks_faulted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fault_result(&self) {
        self.fault_results_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_fault(&self) {
        self.dropped_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_succeeded: self.batches_succeeded.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            tasks_spawned: self.tasks_spawned.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_aborted: self.tasks_aborted.load(Ordering::Relaxed),
            tasks_faulted: self.tasks_faulted.load(Ordering::Relaxed),
            results_emitted: self.results_emitted.load(Ordering::Relaxed),
            fault_results_emitted: self.fault_results_emitted.load(Ordering::Relaxed),
            dropped_faults: self.dropped_faults.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`ExecutorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub tasks_spawned: u64,
    pub tasks_completed: u64,
    pub tasks_aborted: u64,
    pub tasks_faulted: u64,
    pub results_emitted: u64,
    pub fault_results_emitted: u64,
    pub dropped_faults: u64,
}

impl StatsSnapshot {
    /// Tasks that reached a terminal state
    pub fn tasks_finished(&self) -> u64 {
        self.tasks_completed + self.tasks_aborted + self.tasks_faulted
    }
}
