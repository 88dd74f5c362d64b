//! Local Shard Storage Access
//!
//! The synchronization protocol needs three things from the storage engine:
//! document counts (doubling as checksums), a way to recount a shard from
//! its raw data, and control over which server the shard accepts
//! replicated writes from.

use crate::error::Result;

/// Storage-engine operations on locally hosted shards
#[async_trait::async_trait]
pub trait ShardStore: Send + Sync {
    /// Cheap document count from the shard's metadata
    async fn document_count(&self, database: &str, shard: &str) -> Result<u64>;

    /// Recount documents from the raw data, repairing the metadata count
    async fn recalculate_count(&self, database: &str, shard: &str) -> Result<u64>;

    /// Point the shard at its leader. Replicated writes are only accepted
    /// under this leader reference from now on.
    async fn set_shard_leader(&self, database: &str, shard: &str, leader: &str) -> Result<()>;
}
