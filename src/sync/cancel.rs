//! Cancellation Signals
//!
//! Long-running sync phases check an explicit cancellation value instead
//! of being torn down from outside. Process shutdown, the per-attempt
//! deadline and losing the planned-follower role all cancel a phase.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::cluster::{is_planned_follower, ClusterView};

/// Process-wide shutdown signal shared by all jobs
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown; running phases abort at their next check
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopping(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Plan-membership data for the optional plan check
struct PlanGuard {
    cluster: Arc<dyn ClusterView>,
    database: String,
    collection: String,
    shard: String,
    leader: String,
    server_id: String,
}

/// Cancellation context handed to syncers and long-running phases
pub struct SyncCancellation {
    shutdown: ShutdownFlag,
    deadline: Option<Instant>,
    plan_guard: Option<PlanGuard>,
}

impl SyncCancellation {
    /// Cancellation on shutdown and, when set, a deadline
    pub fn new(shutdown: ShutdownFlag, deadline: Option<Instant>) -> Self {
        Self {
            shutdown,
            deadline,
            plan_guard: None,
        }
    }

    /// Additionally cancel when this server stops being a planned follower
    /// of the shard behind the expected leader
    pub fn with_plan_guard(
        mut self,
        cluster: Arc<dyn ClusterView>,
        database: impl Into<String>,
        collection: impl Into<String>,
        shard: impl Into<String>,
        leader: impl Into<String>,
        server_id: impl Into<String>,
    ) -> Self {
        self.plan_guard = Some(PlanGuard {
            cluster,
            database: database.into(),
            collection: collection.into(),
            shard: shard.into(),
            leader: leader.into(),
            server_id: server_id.into(),
        });
        self
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_stopping()
    }

    /// Whether the per-attempt deadline has passed
    pub fn deadline_exceeded(&self) -> bool {
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// Full cancellation check. The plan lookup only runs when the cheap
    /// checks pass.
    pub async fn should_cancel(&self) -> bool {
        if self.is_stopping() || self.deadline_exceeded() {
            return true;
        }
        if let Some(guard) = &self.plan_guard {
            let plan = match guard
                .cluster
                .shard_plan(&guard.database, &guard.collection, &guard.shard)
                .await
            {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::debug!(
                        "Plan lookup for shard {}/{} failed during cancellation check: {}",
                        guard.database,
                        guard.shard,
                        e
                    );
                    return true;
                }
            };
            if !is_planned_follower(&plan, &guard.leader, &guard.server_id) {
                return true;
            }
        }
        false
    }
}
