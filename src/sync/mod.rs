//! Shard Synchronization
//!
//! Brings a follower replica of a shard back in sync with its leader and
//! into the leader's follower set: wholesale initial transfer, WAL
//! catch-up under soft read locks, and a final exclusive catch-up under a
//! hard lock.

mod cancel;
mod catchup;
mod coordinator;
mod finalize;
mod job;
mod syncer;

pub use cancel::{ShutdownFlag, SyncCancellation};
pub use catchup::CatchupDriver;
pub use coordinator::SyncCoordinator;
pub use finalize::ExclusiveFinalizer;
pub use job::{JobPriority, SyncJobSpec, SyncJobState};
pub use syncer::{
    CatchupStatus, InitialSyncConfig, InitialSyncer, SyncOutcome, SyncerFactory, TailingSyncer,
};

use std::sync::Arc;

use crate::cluster::{ClusterView, NodeIdentity};
use crate::config::SyncConfig;
use crate::state::FailureTracker;
use crate::store::ShardStore;

/// WAL log position
pub type Tick = u64;

/// Shared environment for synchronization jobs: configuration, the local
/// server's identity and the long-lived collaborators every job needs.
pub struct SyncContext {
    pub config: SyncConfig,
    pub identity: NodeIdentity,
    pub cluster: Arc<dyn ClusterView>,
    pub store: Arc<dyn ShardStore>,
    pub syncers: Arc<dyn SyncerFactory>,
    pub tracker: Arc<FailureTracker>,
    pub shutdown: ShutdownFlag,
    pub http: reqwest::Client,
}
