//! Read-Lock Management
//!
//! Acquires soft and hard read locks on a shard leader and makes sure
//! every acquired lock is released exactly once, whichever way a
//! synchronization phase exits.

use std::time::Duration;

use super::client::LeaderClient;
use super::wire::LockRequest;
use crate::error::{Error, Result};
use crate::sync::Tick;

/// Lock softness. Soft locks let running write transactions finish; hard
/// locks stop writes for the lifetime of the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Soft,
    Hard,
}

impl LockMode {
    /// Wire representation of the softness flag
    pub fn is_soft(self) -> bool {
        matches!(self, LockMode::Soft)
    }
}

/// Term information granted along with a hard lock. Zero means the leader
/// did not send the field.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockTerms {
    /// Fencing term the shard follows the leader under
    pub following_term: u64,

    /// Upper bound for tailing; the leader writes nothing beyond this
    /// tick while the lock is held
    pub last_log_tick: Tick,
}

/// An acquired read lock on the leader.
///
/// Consume it with [`LockHandle::release`] or [`LockHandle::release_quietly`].
/// Dropping an unreleased handle spawns a best-effort cancellation; the TTL
/// covers locks the cancellation cannot reach.
#[derive(Debug)]
pub struct LockHandle {
    id: u64,
    mode: LockMode,
    ttl: Duration,
    shard: String,
    client: LeaderClient,
    cancel_timeout: Duration,
    released: bool,
}

impl LockHandle {
    /// Lock job id on the leader
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Softness this lock was acquired with
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// TTL the lock was requested with
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Release the lock; a failed cancellation is escalated to the caller.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        if let Err(e) = self.client.cancel_lock(self.id, self.cancel_timeout).await {
            return Err(Error::Internal(format!(
                "Could not cancel read lock {} for shard {}: {}",
                self.id, self.shard, e
            )));
        }
        tracing::debug!("Released read lock {} for shard {}", self.id, self.shard);
        Ok(())
    }

    /// Release the lock, logging instead of failing. For exit paths where
    /// a stale lock merely lingers until its TTL expires.
    pub async fn release_quietly(mut self) {
        self.released = true;
        match self.client.cancel_lock(self.id, self.cancel_timeout).await {
            Ok(()) => {
                tracing::debug!("Released read lock {} for shard {}", self.id, self.shard);
            }
            Err(e) => {
                tracing::info!(
                    "Could not cancel read lock {} for shard {}: {}",
                    self.id,
                    self.shard,
                    e
                );
            }
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Abandoned without an explicit release. Fire a background
        // cancellation; the TTL covers us if it does not get through.
        let client = self.client.clone();
        let id = self.id;
        let shard = self.shard.clone();
        let timeout = self.cancel_timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.cancel_lock(id, timeout).await {
                        tracing::warn!(
                            "Background cancel of read lock {} for shard {} failed: {}",
                            id,
                            shard,
                            e
                        );
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    "Read lock {} for shard {} dropped outside a runtime, it expires via its TTL",
                    id,
                    shard
                );
            }
        }
    }
}

/// Acquires read locks on a shard leader
pub struct LockClient {
    client: LeaderClient,
    acquire_timeout: Duration,
    cancel_timeout: Duration,
}

impl LockClient {
    pub fn new(client: LeaderClient, acquire_timeout: Duration, cancel_timeout: Duration) -> Self {
        Self {
            client,
            acquire_timeout,
            cancel_timeout,
        }
    }

    /// Acquire a read lock on `shard`: allocate a lock id, then plant the
    /// lock under that id.
    pub async fn acquire(
        &self,
        shard: &str,
        ttl: Duration,
        mode: LockMode,
    ) -> Result<(LockHandle, LockTerms)> {
        let id = self.client.fetch_lock_id(self.acquire_timeout).await?;
        let identity = self.client.identity();
        let request = LockRequest {
            id: id.to_string(),
            collection: shard.to_string(),
            ttl: ttl.as_secs(),
            server_id: identity.server_id.clone(),
            reboot_id: identity.reboot_id,
            soft: mode.is_soft(),
            want_following_term: true,
        };

        let grant = match self.client.hold_lock(&request, self.acquire_timeout).await {
            Ok(grant) => grant,
            Err(e) => return Err(self.cleanup_failed_acquire(id, shard, e).await),
        };
        tracing::debug!(
            "Acquired {:?} read lock {} for shard {} with ttl {}s",
            mode,
            id,
            shard,
            ttl.as_secs()
        );

        let handle = LockHandle {
            id,
            mode,
            ttl,
            shard: shard.to_string(),
            client: self.client.clone(),
            cancel_timeout: self.cancel_timeout,
            released: false,
        };
        let terms = LockTerms {
            following_term: grant.following_term.unwrap_or(0),
            last_log_tick: grant.last_log_tick.unwrap_or(0),
        };
        Ok((handle, terms))
    }

    /// The lock may have been planted even though the request failed.
    /// Unless the connection never went through, cancel the allocated id
    /// before reporting the original error.
    async fn cleanup_failed_acquire(&self, id: u64, shard: &str, original: Error) -> Error {
        if matches!(original, Error::ConnectionFailed { .. }) {
            return original;
        }
        if let Err(e) = self.client.cancel_lock(id, self.cancel_timeout).await {
            tracing::info!(
                "Could not cancel possibly planted read lock {} for shard {}: {}",
                id,
                shard,
                e
            );
        }
        original
    }
}
