//! Soft-Lock Catch-Up
//!
//! Replays the leader's write-ahead log under short-lived soft read
//! locks until the follower is close enough for the exclusive phase.
//! Each round acquires a fresh lock, tails up to a time budget well
//! below the lock TTL, and releases the lock before deciding whether
//! another round is needed.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::leader::{LockClient, LockMode};
use crate::sync::cancel::{ShutdownFlag, SyncCancellation};
use crate::sync::syncer::TailingSyncer;
use crate::sync::Tick;

pub struct CatchupDriver {
    locks: Arc<LockClient>,
    tailing: Arc<dyn TailingSyncer>,
    shutdown: ShutdownFlag,
    shard: String,
    max_tries: u32,
    soft_ttl: Duration,
    budget: Duration,
}

impl CatchupDriver {
    pub fn new(
        locks: Arc<LockClient>,
        tailing: Arc<dyn TailingSyncer>,
        shutdown: ShutdownFlag,
        shard: String,
        max_tries: u32,
        soft_ttl: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            locks,
            tailing,
            shutdown,
            shard,
            max_tries,
            soft_ttl,
            budget,
        }
    }

    /// Tail the leader's log from `from` under repeated soft locks.
    ///
    /// Returns the tick the follower reached. If the round limit runs
    /// out before the tailer converges, the caller escalates to a hard
    /// lock with whatever tick was reached.
    pub async fn run(&self, from: Tick, cancel: &SyncCancellation) -> Result<Tick> {
        let mut tick = from;
        let mut hit_budget = true;
        let mut tries = 0;

        while hit_budget && tries < self.max_tries {
            tries += 1;
            if self.shutdown.is_stopping() {
                return Err(Error::ShuttingDown);
            }

            let (lock, _) = self
                .locks
                .acquire(&self.shard, self.soft_ttl, LockMode::Soft)
                .await?;
            tracing::debug!(
                "Catch-up round {} for shard {} from tick {} under soft lock {} with ttl {}s",
                tries,
                self.shard,
                tick,
                lock.id(),
                lock.ttl().as_secs()
            );

            let status = match self.tailing.catchup(&self.shard, tick, self.budget, cancel).await {
                Ok(status) => status,
                Err(e) => {
                    // A dangling lock pins leader resources until its TTL runs out.
                    lock.release_quietly().await;
                    return Err(e);
                }
            };
            lock.release().await?;

            tick = status.tick_reached;
            hit_budget = status.hit_budget;
            if hit_budget {
                tracing::debug!(
                    "Renewing soft lock for shard {} after reaching tick {}",
                    self.shard,
                    tick
                );
            }
        }

        if hit_budget {
            tracing::warn!(
                "Could not catch up with shard {} under soft locks, escalating to a hard lock. \
                 This is expected under high load.",
                self.shard
            );
        }
        Ok(tick)
    }
}
