//! Leader HTTP Client
//!
//! Thin wrapper around a shared HTTP client, bound to one leader endpoint
//! and one database. Every call carries an explicit timeout; failed leader
//! responses are decoded into typed errors.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::wire::{
    AddFollowerRequest, CountResponse, ErrorBody, LockGrantResponse, LockIdResponse, LockRequest,
    UnlockRequest, ADD_FOLLOWER_PATH, ERROR_DATABASE_NOT_FOUND, ERROR_SHARD_NONEMPTY,
    ERROR_SHARD_NOT_FOUND, ERROR_WRONG_CHECKSUM, HOLD_READ_LOCK_PATH,
};
use crate::cluster::NodeIdentity;
use crate::error::{Error, Result};

/// HTTP client for one shard leader
#[derive(Debug, Clone)]
pub struct LeaderClient {
    http: reqwest::Client,
    endpoint: String,
    database: String,
    identity: NodeIdentity,
}

impl LeaderClient {
    /// Create a client bound to a leader endpoint and database
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        database: impl Into<String>,
        identity: NodeIdentity,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            database: database.into(),
            identity,
        }
    }

    /// The leader endpoint this client talks to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Identity used in request bodies
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Allocate a fresh lock job id on the leader
    pub async fn fetch_lock_id(&self, timeout: Duration) -> Result<u64> {
        let response: LockIdResponse = self
            .execute(Method::GET, HOLD_READ_LOCK_PATH, None::<&()>, timeout)
            .await?;
        response
            .id
            .parse::<u64>()
            .map_err(|_| Error::Internal(format!("Invalid lock id from leader: {:?}", response.id)))
    }

    /// Plant a read lock under a previously allocated id
    pub async fn hold_lock(
        &self,
        request: &LockRequest,
        timeout: Duration,
    ) -> Result<LockGrantResponse> {
        self.execute(Method::POST, HOLD_READ_LOCK_PATH, Some(request), timeout)
            .await
    }

    /// Cancel a read lock. A dropped database counts as success, the lock
    /// is gone either way.
    pub async fn cancel_lock(&self, id: u64, timeout: Duration) -> Result<()> {
        let request = UnlockRequest { id: id.to_string() };
        let result: Result<serde_json::Value> = self
            .execute(Method::DELETE, HOLD_READ_LOCK_PATH, Some(&request), timeout)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(Error::DatabaseNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Register the local server as an in-sync follower of a shard
    pub async fn add_follower(
        &self,
        request: &AddFollowerRequest,
        timeout: Duration,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .execute(Method::PUT, ADD_FOLLOWER_PATH, Some(request), timeout)
            .await?;
        Ok(())
    }

    /// Cheap document count of a shard on the leader
    pub async fn shard_count(&self, shard: &str, timeout: Duration) -> Result<u64> {
        let path = format!("/_api/collection/{}/count", shard);
        let response: CountResponse = self
            .execute(Method::GET, &path, None::<&()>, timeout)
            .await?;
        Ok(response.count)
    }

    /// Recount a shard on the leader from its raw data
    pub async fn recalculate_shard_count(&self, shard: &str, timeout: Duration) -> Result<u64> {
        let path = format!("/_api/collection/{}/recalculateCount", shard);
        let response: CountResponse = self
            .execute(Method::PUT, &path, Some(&serde_json::json!({})), timeout)
            .await?;
        Ok(response.count)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/_db/{}{}", self.endpoint, self.database, path)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&impl Serialize>,
        timeout: Duration,
    ) -> Result<T> {
        let url = self.url(path);
        let mut request = self.http.request(method, &url).timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        Err(decode_error(status, &response.bytes().await.unwrap_or_default()))
    }
}

/// Map a failed leader response to a typed error
fn decode_error(status: StatusCode, body: &[u8]) -> Error {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_else(|_| ErrorBody {
        error: true,
        error_num: 0,
        error_message: String::from_utf8_lossy(body).into_owned(),
    });
    let message = if parsed.error_message.is_empty() {
        format!("HTTP {}", status)
    } else {
        parsed.error_message
    };
    match parsed.error_num {
        ERROR_DATABASE_NOT_FOUND => Error::DatabaseNotFound(message),
        ERROR_SHARD_NOT_FOUND => Error::ShardNotFound(message),
        ERROR_SHARD_NONEMPTY => Error::ShardNotEmpty(message),
        ERROR_WRONG_CHECKSUM => Error::ChecksumMismatch(message),
        code => Error::Remote { code, message },
    }
}
