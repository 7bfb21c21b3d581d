// Index errors
//
// Faults raised by storage while scanning or fetching, converted into query
// errors at the executor boundary.

use thiserror::Error;

/// Faults raised by the storage side of an index scan
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("Scan of index {index} failed: {reason}")]
    ScanFailed { index: String, reason: String },

    #[error("Fetch from keyspace {keyspace} failed: {reason}")]
    FetchFailed { keyspace: String, reason: String },

    #[error("Index {0} is not online")]
    NotOnline(String),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, IndexError>;
