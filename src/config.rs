//! WolfShard Configuration
//!
//! This module provides configuration structures for the shard
//! synchronization manager.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main synchronization configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Read-lock configuration
    #[serde(default)]
    pub lock: LockConfig,

    /// Soft catch-up configuration
    #[serde(default)]
    pub catchup: CatchupConfig,

    /// Timeouts for individual leader calls
    #[serde(default)]
    pub leader: LeaderConfig,

    /// Whole-attempt limits
    #[serde(default)]
    pub attempt: AttemptConfig,
}

/// Read-lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// TTL in seconds for soft read locks
    #[serde(default = "default_soft_ttl")]
    pub soft_ttl_secs: u64,

    /// TTL in seconds for hard (exclusive) read locks
    #[serde(default = "default_hard_ttl")]
    pub hard_ttl_secs: u64,

    /// Timeout in seconds for cancelling a lock on the leader
    #[serde(default = "default_cancel_timeout")]
    pub cancel_timeout_secs: u64,

    /// Timeout in seconds for lock acquisition requests
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

/// Soft catch-up configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchupConfig {
    /// Maximum soft-lock catch-up rounds before escalating to a hard lock
    #[serde(default = "default_soft_tries")]
    pub max_soft_tries: u32,

    /// Fraction of the soft lock TTL spent tailing per round
    #[serde(default = "default_budget_fraction")]
    pub budget_fraction: f64,
}

/// Timeouts for individual leader calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderConfig {
    /// Timeout in seconds for document count requests
    #[serde(default = "default_count_timeout")]
    pub count_timeout_secs: u64,

    /// Timeout in seconds for follower registration
    #[serde(default = "default_registrar_timeout")]
    pub registrar_timeout_secs: u64,

    /// Timeout in seconds for a full leader-side shard recount
    #[serde(default = "default_recount_timeout")]
    pub recount_timeout_secs: u64,
}

/// Whole-attempt limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptConfig {
    /// Deadline in seconds for one synchronization attempt (0 = unbounded).
    /// Only enforced for shards that sync by revision tree.
    #[serde(default = "default_attempt_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_soft_ttl() -> u64 {
    300
}

fn default_hard_ttl() -> u64 {
    300
}

fn default_cancel_timeout() -> u64 {
    60
}

fn default_acquire_timeout() -> u64 {
    300
}

fn default_soft_tries() -> u32 {
    18
}

fn default_budget_fraction() -> f64 {
    0.6
}

fn default_count_timeout() -> u64 {
    60
}

fn default_registrar_timeout() -> u64 {
    60
}

fn default_recount_timeout() -> u64 {
    900
}

fn default_attempt_timeout() -> u64 {
    1200
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            soft_ttl_secs: default_soft_ttl(),
            hard_ttl_secs: default_hard_ttl(),
            cancel_timeout_secs: default_cancel_timeout(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            max_soft_tries: default_soft_tries(),
            budget_fraction: default_budget_fraction(),
        }
    }
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            count_timeout_secs: default_count_timeout(),
            registrar_timeout_secs: default_registrar_timeout(),
            recount_timeout_secs: default_recount_timeout(),
        }
    }
}

impl Default for AttemptConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_attempt_timeout(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: SyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.lock.soft_ttl_secs == 0 {
            return Err(crate::Error::Config("lock.soft_ttl_secs cannot be 0".into()));
        }

        if self.lock.hard_ttl_secs == 0 {
            return Err(crate::Error::Config("lock.hard_ttl_secs cannot be 0".into()));
        }

        if self.catchup.max_soft_tries == 0 {
            return Err(crate::Error::Config(
                "catchup.max_soft_tries cannot be 0".into(),
            ));
        }

        if !(self.catchup.budget_fraction > 0.0 && self.catchup.budget_fraction <= 1.0) {
            return Err(crate::Error::Config(
                "catchup.budget_fraction must be within (0, 1]".into(),
            ));
        }

        Ok(())
    }

    /// Get the soft lock TTL as Duration
    pub fn soft_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock.soft_ttl_secs)
    }

    /// Get the hard lock TTL as Duration
    pub fn hard_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock.hard_ttl_secs)
    }

    /// Get the lock cancellation timeout as Duration
    pub fn lock_cancel_timeout(&self) -> Duration {
        Duration::from_secs(self.lock.cancel_timeout_secs)
    }

    /// Get the lock acquisition timeout as Duration
    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.lock.acquire_timeout_secs)
    }

    /// Tailing budget for one soft catch-up round
    pub fn catchup_budget(&self) -> Duration {
        Duration::from_secs_f64(self.lock.soft_ttl_secs as f64 * self.catchup.budget_fraction)
    }

    /// Get the document count timeout as Duration
    pub fn count_timeout(&self) -> Duration {
        Duration::from_secs(self.leader.count_timeout_secs)
    }

    /// Get the follower registration timeout as Duration
    pub fn registrar_timeout(&self) -> Duration {
        Duration::from_secs(self.leader.registrar_timeout_secs)
    }

    /// Get the leader recount timeout as Duration
    pub fn recount_timeout(&self) -> Duration {
        Duration::from_secs(self.leader.recount_timeout_secs)
    }

    /// Get the per-attempt deadline, if one is configured
    pub fn attempt_timeout(&self) -> Option<Duration> {
        if self.attempt.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.attempt.timeout_secs))
        }
    }
}
