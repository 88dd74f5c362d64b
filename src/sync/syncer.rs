//! Syncer Interfaces
//!
//! The heavy lifting of data transfer is done by two external components:
//! an initial syncer that copies shard data wholesale and a tailing syncer
//! that follows the leader's WAL. The protocol drives both through these
//! traits.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::sync::cancel::SyncCancellation;
use crate::sync::Tick;

/// Configuration for one initial shard sync
#[derive(Debug, Clone)]
pub struct InitialSyncConfig {
    /// Leader endpoint to sync from
    pub endpoint: String,

    /// Database the shard lives in
    pub database: String,

    /// Use incremental sync; set when the follower already holds data
    pub incremental: bool,

    /// Leader id replicated writes are attributed to
    pub leader_id: String,

    /// Shards the sync is restricted to; always exactly one here
    pub restrict_collections: Vec<String>,

    /// Include system collections
    pub include_system: bool,

    /// Never create or drop collections while syncing
    pub skip_create_drop: bool,

    /// Human-readable description of this client, shown on the leader
    pub client_info: String,
}

/// Result of a completed initial sync
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// Leader WAL tick the transferred data corresponds to
    pub last_log_tick: Tick,

    /// (id, name) of the collections confirmed present on the leader
    pub collections: Vec<(String, String)>,
}

/// Progress of one tailing round under a soft lock
#[derive(Debug, Clone, Copy)]
pub struct CatchupStatus {
    /// Tick the tailing reached
    pub tick_reached: Tick,

    /// Whether tailing stopped on its time budget instead of catching up
    pub hit_budget: bool,
}

/// Wholesale shard data transfer from the leader
#[async_trait::async_trait]
pub trait InitialSyncer: Send + Sync {
    /// Id under which the leader tracks this syncer's state
    fn syncer_id(&self) -> u64;

    /// Last progress message, for error reporting
    fn progress(&self) -> String;

    /// Run the sync to completion or cancellation
    async fn run(&self, cancel: &SyncCancellation) -> Result<SyncOutcome>;
}

/// Follows the leader's WAL from a start tick, applying writes locally
#[async_trait::async_trait]
pub trait TailingSyncer: Send + Sync {
    /// Change the leader id replicated writes are attributed to
    fn set_leader_id(&self, leader: &str);

    /// Take over connection and progress state from a finished initial sync
    async fn inherit_from_initial(&self, initial: &dyn InitialSyncer) -> Result<()>;

    /// Tail WAL from `from` for at most `budget`
    async fn catchup(
        &self,
        shard: &str,
        from: Tick,
        budget: Duration,
        cancel: &SyncCancellation,
    ) -> Result<CatchupStatus>;

    /// Tail WAL from `from` to the very end, bounded by `upper_bound` when
    /// it is nonzero. Must fully catch up or fail.
    async fn finalize(
        &self,
        shard: &str,
        from: Tick,
        upper_bound: Tick,
        cancel: &SyncCancellation,
    ) -> Result<()>;
}

/// Builds the syncers for one job
pub trait SyncerFactory: Send + Sync {
    fn initial_syncer(&self, config: InitialSyncConfig) -> Result<Arc<dyn InitialSyncer>>;

    fn tailing_syncer(
        &self,
        database: &str,
        endpoint: &str,
        leader: &str,
    ) -> Result<Arc<dyn TailingSyncer>>;
}
