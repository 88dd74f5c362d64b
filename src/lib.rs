//! WolfShard - Distributed Shard Synchronization Manager
//!
//! A Rust-based synchronization manager that brings follower replicas of
//! database shards back in sync with their leader and registers them in the
//! leader's follower set, so the leader replicates subsequent writes to them.
//!
//! # Architecture
//!
//! WolfShard runs on the follower side. A sync attempt transfers the bulk of
//! the shard data without any lock, then catches up with the leader's
//! write-ahead log under short soft read locks, and finishes under a brief
//! hard lock during which the leader accepts no writes. Data transfer itself
//! is delegated to pluggable syncers; this crate drives the protocol around
//! them.
//!
//! # Features
//!
//! - Lock-free initial shard data transfer with incremental resync
//! - Bounded soft-lock catch-up rounds before the exclusive phase
//! - Leader fencing via following terms granted with hard locks
//! - Document-count checksums with local and leader-side recount recovery
//! - Failure tracking with quadratic backoff for flapping shards
//! - Cancellation on shutdown, plan changes and per-attempt deadlines

pub mod cluster;
pub mod config;
pub mod error;
pub mod leader;
pub mod state;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use config::SyncConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{ClusterView, NodeIdentity};
    pub use crate::config::SyncConfig;
    pub use crate::error::{Error, Result};
    pub use crate::state::{FailureTracker, TrackerSummary};
    pub use crate::store::ShardStore;
    pub use crate::sync::{
        JobPriority, ShutdownFlag, SyncContext, SyncCoordinator, SyncJobSpec, Tick,
    };
}
