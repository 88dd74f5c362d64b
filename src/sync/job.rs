//! Synchronization Jobs
//!
//! Job descriptions handed in by the maintenance scheduler and the mutable
//! state a running job accumulates.

use chrono::{DateTime, Utc};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::sync::Tick;

/// Scheduling priority of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPriority {
    /// Regular maintenance priority
    Normal,
    /// Background priority for long-running catch-ups
    Slow,
}

/// Immutable description of one shard synchronization job
#[derive(Debug, Clone)]
pub struct SyncJobSpec {
    /// Database the shard lives in
    pub database: String,

    /// Shard to synchronize
    pub shard: String,

    /// Logical collection the shard belongs to
    pub collection: String,

    /// Server id of the expected shard leader
    pub leader: String,

    /// Local shard version at scheduling time
    pub shard_version: u64,

    /// Resync even though the shard already reports as in sync
    pub forced_resync: bool,

    /// The shard syncs by revision tree, which enables the per-attempt
    /// deadline
    pub sync_by_revision: bool,

    /// Scheduling priority this job runs at
    pub priority: JobPriority,
}

impl SyncJobSpec {
    /// A job without database, shard, collection or leader can never run
    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(Error::Config("Sync job is missing the database".into()));
        }
        if self.shard.is_empty() {
            return Err(Error::Config("Sync job is missing the shard".into()));
        }
        if self.collection.is_empty() {
            return Err(Error::Config("Sync job is missing the collection".into()));
        }
        if self.leader.is_empty() {
            return Err(Error::Config("Sync job is missing the leader".into()));
        }
        Ok(())
    }

    /// Description of this follower for leader-side bookkeeping and logs
    pub fn client_info(&self, server_id: &str) -> String {
        format!(
            "follower {} of shard {}/{} of collection {}/{}",
            server_id, self.database, self.shard, self.database, self.collection
        )
    }
}

/// Mutable state accumulated while a job runs
#[derive(Debug)]
pub struct SyncJobState {
    /// Fencing term granted with the hard lock (0 until granted)
    pub following_term: u64,

    /// Tailing upper bound granted with the hard lock (0 until granted)
    pub upper_bound_tick: Tick,

    /// Leader document count sampled before the initial sync
    pub initial_docs_on_leader: u64,

    /// Local document count sampled before the initial sync
    pub initial_docs_on_follower: u64,

    /// Local document count reported when registering
    pub docs_at_end: u64,

    /// Description of this follower sent to the leader
    pub client_info: String,

    /// Per-attempt deadline, when one is configured
    pub deadline: Option<Instant>,

    /// Wall-clock start of the job
    pub started_at: DateTime<Utc>,
}

impl SyncJobState {
    pub fn new(client_info: String, deadline: Option<Instant>) -> Self {
        Self {
            following_term: 0,
            upper_bound_tick: 0,
            initial_docs_on_leader: 0,
            initial_docs_on_follower: 0,
            docs_at_end: 0,
            client_info,
            deadline,
            started_at: Utc::now(),
        }
    }

    /// Leader reference including the following term once one was granted
    pub fn leader_with_term(&self, leader: &str) -> String {
        if self.following_term != 0 {
            format!("{}_{}", leader, self.following_term)
        } else {
            leader.to_string()
        }
    }
}

/// One-line job summary for log messages
pub(crate) fn shard_summary(spec: &SyncJobSpec, started_at: DateTime<Utc>) -> String {
    format!(
        "shard {}/{} of collection {}/{} from leader {} (started {})",
        spec.database,
        spec.shard,
        spec.database,
        spec.collection,
        spec.leader,
        started_at.to_rfc3339()
    )
}
