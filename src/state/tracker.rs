//! Failure Tracking
//!
//! Per-shard bookkeeping that outlives individual jobs: consecutive
//! replication failures feeding the pre-sync backoff, shard version
//! counters, and a few monotonic counters exported as metrics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Snapshot of the tracker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerSummary {
    /// Shards currently carrying a nonzero failure count
    pub shards_with_errors: usize,

    /// Attempts that ran into the per-attempt deadline
    pub timed_out_attempts: u64,

    /// Registrations a leader rejected over a checksum mismatch
    pub checksum_mismatches: u64,
}

/// Thread-safe per-shard failure and version bookkeeping
#[derive(Default)]
pub struct FailureTracker {
    /// (database, shard) -> consecutive counted failures
    errors: Mutex<HashMap<(String, String), u32>>,

    /// shard -> version counter
    versions: Mutex<HashMap<String, u64>>,

    timed_out_attempts: AtomicU64,
    checksum_mismatches: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive counted failures recorded for a shard
    pub fn replication_errors(&self, database: &str, shard: &str) -> u32 {
        lock(&self.errors)
            .get(&(database.to_string(), shard.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Record a counted failure against a shard
    pub fn store_replication_error(&self, database: &str, shard: &str) {
        let mut errors = lock(&self.errors);
        *errors
            .entry((database.to_string(), shard.to_string()))
            .or_insert(0) += 1;
    }

    /// Clear the failure count after a successful sync
    pub fn remove_replication_error(&self, database: &str, shard: &str) {
        lock(&self.errors).remove(&(database.to_string(), shard.to_string()));
    }

    /// Record an attempt that ran into the per-attempt deadline
    pub fn count_timed_out_attempt(&self) {
        self.timed_out_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a checksum mismatch reported by a leader
    pub fn count_checksum_mismatch(&self) {
        self.checksum_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump and return the version counter of a shard
    pub fn bump_shard_version(&self, shard: &str) -> u64 {
        let mut versions = lock(&self.versions);
        let version = versions.entry(shard.to_string()).or_insert(0);
        *version += 1;
        *version
    }

    /// Current version counter of a shard
    pub fn shard_version(&self, shard: &str) -> u64 {
        lock(&self.versions).get(shard).copied().unwrap_or(0)
    }

    /// Counter snapshot for metrics export
    pub fn summary(&self) -> TrackerSummary {
        TrackerSummary {
            shards_with_errors: lock(&self.errors).len(),
            timed_out_attempts: self.timed_out_attempts.load(Ordering::Relaxed),
            checksum_mismatches: self.checksum_mismatches.load(Ordering::Relaxed),
        }
    }
}
