//! Cluster Metadata Access
//!
//! Read-side view of the replicated cluster metadata: which servers are
//! planned to host a shard, which servers currently report it as in sync,
//! and how far the local cache of the current state has caught up.

use std::time::Duration;

use crate::error::Result;

/// Identity of the local server within the cluster
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Server id as it appears in plan and current server lists
    pub server_id: String,

    /// Numeric instance id reported to leaders when registering
    pub instance_id: u64,

    /// Boot counter, incremented on every restart. Leaders drop read locks
    /// held by earlier incarnations of this server.
    pub reboot_id: u64,
}

/// Read access to the cluster plan and current state.
///
/// The first entry of a server list is the shard leader; the remaining
/// entries are followers in no particular order.
#[async_trait::async_trait]
pub trait ClusterView: Send + Sync {
    /// Planned servers for a shard, leader first
    async fn shard_plan(
        &self,
        database: &str,
        collection: &str,
        shard: &str,
    ) -> Result<Vec<String>>;

    /// Servers currently reporting the shard as in sync, leader first
    async fn shard_current(
        &self,
        database: &str,
        collection: &str,
        shard: &str,
    ) -> Result<Vec<String>>;

    /// Resolve a server id to its HTTP endpoint
    async fn server_endpoint(&self, server: &str) -> Result<String>;

    /// Version of the local current-state cache
    async fn current_version(&self, timeout: Duration) -> Result<u64>;

    /// Block until the local current-state cache has absorbed `version`
    async fn wait_for_current_version(&self, version: u64) -> Result<()>;
}

/// Check whether `server` is a planned follower of the shard, i.e. appears
/// in the plan behind the expected leader.
pub fn is_planned_follower(plan: &[String], leader: &str, server: &str) -> bool {
    match plan.split_first() {
        Some((first, rest)) => first == leader && rest.iter().any(|s| s == server),
        None => false,
    }
}
