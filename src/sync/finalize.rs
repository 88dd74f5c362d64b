//! Exclusive Finalization
//!
//! The last leg of a shard sync. Takes a hard read lock that stops
//! writes on the leader, applies the remaining log entries up to the
//! tick bound the lock reported, and registers this server in the
//! leader's follower set while the lock still holds.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::leader::{FollowerRegistrar, LeaderClient, LockClient, LockMode};
use crate::state::FailureTracker;
use crate::store::ShardStore;
use crate::sync::cancel::SyncCancellation;
use crate::sync::job::SyncJobState;
use crate::sync::syncer::TailingSyncer;
use crate::sync::Tick;

pub struct ExclusiveFinalizer {
    locks: Arc<LockClient>,
    client: LeaderClient,
    registrar: FollowerRegistrar,
    tailing: Arc<dyn TailingSyncer>,
    store: Arc<dyn ShardStore>,
    tracker: Arc<FailureTracker>,
    database: String,
    shard: String,
    leader: String,
    hard_ttl: Duration,
    recount_timeout: Duration,
    syncer_id: u64,
}

impl ExclusiveFinalizer {
    pub fn new(
        locks: Arc<LockClient>,
        client: LeaderClient,
        registrar: FollowerRegistrar,
        tailing: Arc<dyn TailingSyncer>,
        store: Arc<dyn ShardStore>,
        tracker: Arc<FailureTracker>,
        database: String,
        shard: String,
        leader: String,
        hard_ttl: Duration,
        recount_timeout: Duration,
        syncer_id: u64,
    ) -> Self {
        Self {
            locks,
            client,
            registrar,
            tailing,
            store,
            tracker,
            database,
            shard,
            leader,
            hard_ttl,
            recount_timeout,
            syncer_id,
        }
    }

    /// Finish the sync under a hard lock, starting from tick `from`.
    ///
    /// On success the follower is part of the leader's follower set and
    /// `state` carries the final bookkeeping. Any error leaves the lock
    /// released.
    pub async fn run(
        &self,
        state: &mut SyncJobState,
        from: Tick,
        cancel: &SyncCancellation,
    ) -> Result<()> {
        let (lock, terms) = self
            .locks
            .acquire(&self.shard, self.hard_ttl, LockMode::Hard)
            .await?;
        state.following_term = terms.following_term;
        state.upper_bound_tick = terms.last_log_tick;
        let leader_ref = state.leader_with_term(&self.leader);
        tracing::debug!(
            "Hard lock {} on shard {}/{} granted, following {} up to tick {}",
            lock.id(),
            self.database,
            self.shard,
            leader_ref,
            state.upper_bound_tick
        );

        if let Err(e) = self
            .store
            .set_shard_leader(&self.database, &self.shard, &leader_ref)
            .await
        {
            lock.release_quietly().await;
            return Err(e.with_context(&format!(
                "Could not record leader of shard {}/{}",
                self.database, self.shard
            )));
        }
        self.tailing.set_leader_id(&leader_ref);

        if let Err(e) = self
            .tailing
            .finalize(&self.shard, from, state.upper_bound_tick, cancel)
            .await
        {
            lock.release_quietly().await;
            return Err(e.with_context(&format!(
                "Could not finalize shard {}/{}",
                self.database, self.shard
            )));
        }

        match self
            .registrar
            .register(
                &self.database,
                &self.shard,
                Some(lock.id()),
                self.syncer_id,
                &state.client_info,
            )
            .await
        {
            Ok(count) => {
                state.docs_at_end = count;
                lock.release_quietly().await;
                Ok(())
            }
            Err(Error::ChecksumMismatch(message)) => {
                // The lock stops all writes on the leader, so give it back
                // before any recount round-trips.
                lock.release_quietly().await;
                self.repair_counts().await?;
                Err(Error::ChecksumMismatch(message))
            }
            Err(e) => {
                lock.release_quietly().await;
                Err(e)
            }
        }
    }

    /// Figure out which side of a checksum mismatch is off.
    ///
    /// Recounts locally first. Only if the local metadata count holds up
    /// is the leader asked for a recount, which can take a while on a
    /// large shard. The original mismatch is reported either way unless
    /// the leader recount itself fails.
    async fn repair_counts(&self) -> Result<()> {
        self.tracker.count_checksum_mismatch();
        let counted = self
            .store
            .document_count(&self.database, &self.shard)
            .await?;
        let recounted = self
            .store
            .recalculate_count(&self.database, &self.shard)
            .await?;
        if counted != recounted {
            tracing::warn!(
                "Local count of shard {}/{} was off: metadata said {}, recount found {}",
                self.database,
                self.shard,
                counted,
                recounted
            );
            return Ok(());
        }

        let leader_count = self
            .client
            .recalculate_shard_count(&self.shard, self.recount_timeout)
            .await
            .map_err(|e| {
                e.with_context(&format!(
                    "Leader recount of shard {}/{} failed",
                    self.database, self.shard
                ))
            })?;
        tracing::info!(
            "Leader recount of shard {}/{} returned {}, local count is {}",
            self.database,
            self.shard,
            leader_count,
            counted
        );
        Ok(())
    }
}
