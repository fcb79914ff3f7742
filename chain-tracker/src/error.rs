//! Error types for the chain tracker.

use std::io;

use bitcoin::BlockHash;
use thiserror::Error;

/// Top-level error type used by the client facade and the binary.
#[derive(Debug, Error)]
pub enum ChainTrackerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Chain state error: {0}")]
    ChainState(#[from] ChainStateError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors decoding a persisted chainwork value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainWorkError {
    #[error("Invalid chainwork hex {value:?}: {reason}")]
    InvalidHex {
        value: String,
        reason: String,
    },
}

/// Persistence-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Blocking task failed: {0}")]
    TaskJoin(String),
}

impl StorageError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: io::Error) -> Self {
        StorageError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Errors raised by the chain state store.
#[derive(Debug, Error)]
pub enum ChainStateError {
    /// The branch cannot be applied to the height index. Nothing was changed.
    #[error("Invalid branch: {0}")]
    InvalidBranch(String),

    /// The in-memory update and event publication already took effect.
    #[error("Persistence failed after the in-memory update: {0}")]
    Persistence(#[from] StorageError),
}

/// Transport-related errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Invalid remote URL {0}")]
    InvalidUrl(String),

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus {
        status: u16,
        url: String,
    },
}

/// Synchronization-related errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No common ancestor found walking back from {remote_tip} ({requests} requests)")]
    CommonAncestorNotFound {
        remote_tip: BlockHash,
        requests: u32,
    },

    #[error("Remote returned no headers preceding {0}")]
    EmptyResponse(BlockHash),

    #[error("Payload of {len} bytes is not a multiple of the {record} byte header size")]
    MalformedPayload {
        len: usize,
        record: usize,
    },

    #[error("Failed to decode header: {0}")]
    Decode(#[from] bitcoin::consensus::encode::Error),

    #[error("Expected batch to start at {expected}, got {got}")]
    UnexpectedHeader {
        expected: BlockHash,
        got: BlockHash,
    },

    #[error("Header {child} does not link to {parent}")]
    BrokenLinkage {
        child: BlockHash,
        parent: BlockHash,
    },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Chain state error: {0}")]
    ChainState(#[from] ChainStateError),
}

impl SyncError {
    /// Returns a static string naming the error category.
    pub fn category(&self) -> &'static str {
        match self {
            SyncError::CommonAncestorNotFound {
                ..
            }
            | SyncError::EmptyResponse(_) => "protocol",
            SyncError::MalformedPayload {
                ..
            }
            | SyncError::Decode(_)
            | SyncError::UnexpectedHeader {
                ..
            }
            | SyncError::BrokenLinkage {
                ..
            } => "malformed",
            SyncError::Network(_) => "network",
            SyncError::ChainState(ChainStateError::Persistence(_)) => "storage",
            SyncError::ChainState(ChainStateError::InvalidBranch(_)) => "malformed",
        }
    }
}

/// Logging-related errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    DirectoryCreation(#[from] io::Error),

    #[error("Failed to create log file appender: {0}")]
    Appender(String),

    #[error("Subscriber initialization failed: {0}")]
    SubscriberInit(String),
}

/// Type alias for Result with ChainTrackerError.
pub type Result<T> = std::result::Result<T, ChainTrackerError>;

/// Type alias for storage operation results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Type alias for chain state mutation results.
pub type ChainStateResult<T> = std::result::Result<T, ChainStateError>;

/// Type alias for network operation results.
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// Type alias for sync operation results.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Type alias for logging operation results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[test]
    fn test_sync_error_category() {
        let hash = BlockHash::all_zeros();

        assert_eq!(
            SyncError::CommonAncestorNotFound {
                remote_tip: hash,
                requests: 3
            }
            .category(),
            "protocol"
        );
        assert_eq!(SyncError::EmptyResponse(hash).category(), "protocol");
        assert_eq!(
            SyncError::MalformedPayload {
                len: 81,
                record: 80
            }
            .category(),
            "malformed"
        );
        assert_eq!(SyncError::Network(NetworkError::Timeout("x".into())).category(), "network");
        assert_eq!(
            SyncError::ChainState(ChainStateError::Persistence(StorageError::Corruption(
                "x".into()
            )))
            .category(),
            "storage"
        );
    }

    #[test]
    fn test_persistence_error_keeps_cause() {
        let err = ChainStateError::from(StorageError::io(
            "/tmp/mainNet_0.headers",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        ));
        let source = std::error::Error::source(&err).expect("wrapped storage error");
        assert!(source.to_string().contains("mainNet_0.headers"));
    }
}
