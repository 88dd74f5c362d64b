//! WolfShard Error Types

use thiserror::Error;

/// Result type alias for shard synchronization operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfShard error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Lifecycle errors
    #[error("Shutdown in progress")]
    ShuttingDown,

    #[error("Plan changed: {0}")]
    PlanChanged(String),

    #[error("Shard synchronization attempt timed out")]
    AttemptTimeout,

    #[error("Rescheduled: {0}")]
    Rescheduled(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // Leader responses
    #[error("Leader error {code}: {message}")]
    Remote { code: u64, message: String },

    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    #[error("Shard not found: {0}")]
    ShardNotFound(String),

    #[error("Shard not empty on leader: {0}")]
    ShardNotEmpty(String),

    #[error("Checksum mismatch: {0}")]
    ChecksumMismatch(String),

    // Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error counts against the shard's consecutive failure
    /// total. Shutdowns, plan changes, attempt timeouts and reschedules end
    /// a job without saying anything about the shard's health.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(
            self,
            Error::ShuttingDown
                | Error::PlanChanged(_)
                | Error::AttemptTimeout
                | Error::Rescheduled(_)
        )
    }

    /// Check if this error is worth retrying on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
                | Error::ChecksumMismatch(_)
        )
    }

    /// Prefix a context onto the error message, keeping the error class
    /// intact so classification still works on the wrapped error
    pub fn with_context(self, context: &str) -> Error {
        match self {
            Error::Config(m) => Error::Config(format!("{}: {}", context, m)),
            Error::PlanChanged(m) => Error::PlanChanged(format!("{}: {}", context, m)),
            Error::Rescheduled(m) => Error::Rescheduled(format!("{}: {}", context, m)),
            Error::Network(m) => Error::Network(format!("{}: {}", context, m)),
            Error::ConnectionFailed { address, reason } => Error::ConnectionFailed {
                address,
                reason: format!("{}: {}", context, reason),
            },
            Error::ConnectionTimeout(m) => Error::ConnectionTimeout(format!("{}: {}", context, m)),
            Error::Remote { code, message } => Error::Remote {
                code,
                message: format!("{}: {}", context, message),
            },
            Error::DatabaseNotFound(m) => Error::DatabaseNotFound(format!("{}: {}", context, m)),
            Error::ShardNotFound(m) => Error::ShardNotFound(format!("{}: {}", context, m)),
            Error::ShardNotEmpty(m) => Error::ShardNotEmpty(format!("{}: {}", context, m)),
            Error::ChecksumMismatch(m) => Error::ChecksumMismatch(format!("{}: {}", context, m)),
            Error::Replication(m) => Error::Replication(format!("{}: {}", context, m)),
            Error::Internal(m) => Error::Internal(format!("{}: {}", context, m)),
            other => other,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let address = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "leader".to_string());
        if e.is_connect() {
            Error::ConnectionFailed {
                address,
                reason: e.to_string(),
            }
        } else if e.is_timeout() {
            Error::ConnectionTimeout(address)
        } else {
            Error::Network(e.to_string())
        }
    }
}
