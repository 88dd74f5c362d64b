//! Leader RPC Layer
//!
//! Client side of the shard leader's replication API: read-lock
//! management, follower registration and document counting.

pub mod wire;
mod client;
mod lock;
mod registrar;

pub use client::LeaderClient;
pub use lock::{LockClient, LockHandle, LockMode, LockTerms};
pub use registrar::FollowerRegistrar;
