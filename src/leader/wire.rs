//! Leader Wire Protocol
//!
//! Request and response bodies exchanged with the shard leader over its
//! replication API. Field names travel in camelCase; lock ids travel as
//! decimal strings.

use serde::{Deserialize, Serialize};

/// Path for read-lock management on the leader
pub const HOLD_READ_LOCK_PATH: &str = "/_api/replication/holdReadLockCollection";

/// Path for follower registration on the leader
pub const ADD_FOLLOWER_PATH: &str = "/_api/replication/addFollower";

// Stable wire error codes. The numeric values are part of the protocol.
/// The database has been dropped
pub const ERROR_DATABASE_NOT_FOUND: u64 = 1228;
/// The shard is unknown on the receiving server
pub const ERROR_SHARD_NOT_FOUND: u64 = 1203;
/// The leader refuses lockless registration for a non-empty shard
pub const ERROR_SHARD_NONEMPTY: u64 = 1487;
/// Follower and leader checksums disagree
pub const ERROR_WRONG_CHECKSUM: u64 = 1493;

/// Response to a lock id allocation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockIdResponse {
    pub id: String,
}

/// Read-lock request body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
    /// Previously allocated lock job id
    pub id: String,

    /// Shard to lock
    pub collection: String,

    /// Lock lifetime in seconds
    pub ttl: u64,

    /// Server id of the requesting follower
    pub server_id: String,

    /// Boot counter of the requesting follower
    pub reboot_id: u64,

    /// Soft locks let running write transactions finish; hard locks stop
    /// writes for the lifetime of the lock
    pub soft: bool,

    /// Ask the leader to allocate a following term for this lock
    pub want_following_term: bool,
}

/// Read-lock grant. The term fields are only sent for hard locks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockGrantResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub following_term: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_log_tick: Option<u64>,
}

/// Lock cancellation body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockRequest {
    pub id: String,
}

/// Follower registration body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFollowerRequest {
    /// Server id of the registering follower
    pub follower_id: String,

    /// Shard being registered for
    pub shard: String,

    /// Local document count, as a decimal string
    pub checksum: String,

    /// Numeric instance id of the follower
    pub server_id: String,

    /// Id of the syncer that replicated the data, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syncer_id: Option<String>,

    /// Human-readable description of the syncing client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<String>,

    /// Lock job id the registration happens under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_lock_id: Option<String>,
}

/// Document count response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Error body returned by the leader on failed requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub error: bool,

    #[serde(default)]
    pub error_num: u64,

    #[serde(default)]
    pub error_message: String,
}
