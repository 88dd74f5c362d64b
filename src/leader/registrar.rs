//! Follower Registration
//!
//! Reports the local server to a shard leader as an in-sync follower,
//! using the local document count as the checksum the leader verifies.

use std::sync::Arc;
use std::time::Duration;

use super::client::LeaderClient;
use super::wire::AddFollowerRequest;
use crate::error::{Error, Result};
use crate::store::ShardStore;

/// Registers the local server in a shard leader's follower set
pub struct FollowerRegistrar {
    client: LeaderClient,
    store: Arc<dyn ShardStore>,
    timeout: Duration,
}

impl FollowerRegistrar {
    pub fn new(client: LeaderClient, store: Arc<dyn ShardStore>, timeout: Duration) -> Self {
        Self {
            client,
            store,
            timeout,
        }
    }

    /// Count local documents and register under that checksum. Returns the
    /// count that was reported.
    ///
    /// Without a lock id this is the legacy lockless path: a leader protest
    /// over a non-empty shard is handed back verbatim so the caller can
    /// drop its data and resync from scratch. Checksum mismatches also pass
    /// through untouched; everything else is wrapped with context.
    pub async fn register(
        &self,
        database: &str,
        shard: &str,
        read_lock_id: Option<u64>,
        syncer_id: u64,
        client_info: &str,
    ) -> Result<u64> {
        let count = self.store.document_count(database, shard).await?;
        let identity = self.client.identity();
        let request = AddFollowerRequest {
            follower_id: identity.server_id.clone(),
            shard: shard.to_string(),
            checksum: count.to_string(),
            server_id: identity.instance_id.to_string(),
            syncer_id: (syncer_id != 0).then(|| syncer_id.to_string()),
            client_info: (!client_info.is_empty()).then(|| client_info.to_string()),
            read_lock_id: read_lock_id.map(|id| id.to_string()),
        };

        match self.client.add_follower(&request, self.timeout).await {
            Ok(()) => {
                tracing::debug!(
                    "Registered {} as follower of shard {}/{} with checksum {}",
                    identity.server_id,
                    database,
                    shard,
                    count
                );
                Ok(count)
            }
            Err(Error::ShardNotEmpty(message)) if read_lock_id.is_none() => {
                Err(Error::ShardNotEmpty(message))
            }
            Err(Error::ChecksumMismatch(message)) => Err(Error::ChecksumMismatch(message)),
            Err(e) => Err(e.with_context(&format!(
                "Failed to add {} as follower of shard {}/{}",
                identity.server_id, database, shard
            ))),
        }
    }
}
