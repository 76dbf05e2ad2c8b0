//! Blockd Error Types

use thiserror::Error;

/// Result type alias for blockd client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Blockd client error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Transport errors
    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Handshake with {address} failed: unexpected greeting {received:?}")]
    Handshake { address: String, received: String },

    #[error("Not connected to {0}")]
    NotConnected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Message exceeded {limit} bytes without a line terminator")]
    MessageTooLong { limit: usize },

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    // Lock errors
    #[error("Timed out waiting for lock {lock_id}")]
    LockTimeout { lock_id: String },

    #[error("No lock held for {lock_id}")]
    NoSuchLock { lock_id: String },

    #[error("Invalid lock identifier: {0:?}")]
    InvalidLockId(String),

    // Cluster errors
    #[error("No node owns lock hash {lock_hash}")]
    Routing { lock_hash: i32 },

    #[error("Cluster has no nodes")]
    NoNodes,

    #[error("{} of the cluster's nodes failed: {}", .failures.len(), describe_failures(.failures))]
    PartialFailure {
        succeeded: Vec<String>,
        failures: Vec<NodeFailure>,
    },

    #[error("Errors while closing connection: {}", .0.join("; "))]
    Close(Vec<String>),
}

/// A failure reported by one node during a cluster-wide operation
#[derive(Debug)]
pub struct NodeFailure {
    /// Node address (host:port)
    pub node: String,
    /// What went wrong on that node
    pub error: Error,
}

fn describe_failures(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.node, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// The server refused the operation (the lock exists but is not ours to have)
    pub fn is_denied(&self) -> bool {
        matches!(self, Error::LockTimeout { .. } | Error::NoSuchLock { .. })
    }

    /// The server could not be reached
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout(_)
                | Error::Handshake { .. }
                | Error::NotConnected(_)
                | Error::Io(_)
        )
    }

    /// The connection is out of sync with the server and must be re-established
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::MessageTooLong { .. } | Error::Codec(_) | Error::Io(_)
        )
    }

    /// Check if this error is worth retrying from the caller's side
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. } | Error::ConnectionTimeout(_) | Error::NotConnected(_)
        )
    }
}
