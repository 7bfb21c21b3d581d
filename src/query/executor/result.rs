// Query Result Types
//
// Error taxonomy shared by the pipeline and the response layer. Every error
// carries a numeric code that clients (and the HTTP status mapping) key on.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

use crate::common::format_duration;
use crate::index::IndexError;

/// Errors and warnings raised while executing a query
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Request deadline exceeded
    #[error("Timeout {} exceeded", format_duration(*.0))]
    Timeout(Duration),
    /// A result item could not be serialized
    #[error("Invalid JSON in results: {0}")]
    InvalidJson(String),
    /// The operator plan cannot be turned into a pipeline
    #[error("Plan error: {0}")]
    Plan(String),
    /// Unexpected condition inside the execution engine
    #[error("Internal error: {0}")]
    Internal(String),
    /// Fault contained at an operator boundary
    #[error("Panic: {0}")]
    Panic(String),
    /// Error surfaced by the storage layer
    #[error("Error in datastore: {0}")]
    Datastore(String),
    /// Storage deadline hit where the scan cannot be resumed
    #[error("Index scan timed out")]
    IndexScanTimeout,
    /// Warning: a primary scan had to be resumed in chunks
    #[error("Primary index scan timed out - resorted to chunked scan")]
    ChunkedScan,
}

/// Result type for query execution
pub type QueryResult<T> = std::result::Result<T, QueryError>;

impl QueryError {
    pub const TIMEOUT: i32 = 1080;
    pub const INVALID_JSON: i32 = 1100;
    pub const PLAN: i32 = 4000;
    pub const INTERNAL: i32 = 5000;
    pub const PANIC: i32 = 5001;
    pub const DATASTORE: i32 = 12004;
    pub const INDEX_SCAN_TIMEOUT: i32 = 12015;
    pub const CHUNKED_SCAN: i32 = 12016;

    /// Machine-readable error code
    pub fn code(&self) -> i32 {
        match self {
            QueryError::Timeout(_) => Self::TIMEOUT,
            QueryError::InvalidJson(_) => Self::INVALID_JSON,
            QueryError::Plan(_) => Self::PLAN,
            QueryError::Internal(_) => Self::INTERNAL,
            QueryError::Panic(_) => Self::PANIC,
            QueryError::Datastore(_) => Self::DATASTORE,
            QueryError::IndexScanTimeout => Self::INDEX_SCAN_TIMEOUT,
            QueryError::ChunkedScan => Self::CHUNKED_SCAN,
        }
    }

    /// Warnings that should be reported at most once per request
    pub fn is_once_only(&self) -> bool {
        matches!(self, QueryError::ChunkedScan)
    }

    /// `{code, msg}` object as it appears in the response document
    pub fn to_json(&self) -> Value {
        json!({
            "code": self.code(),
            "msg": self.to_string(),
        })
    }
}

impl From<IndexError> for QueryError {
    fn from(err: IndexError) -> Self {
        QueryError::Datastore(err.to_string())
    }
}

/// HTTP status for an error, meaningful only before any byte of the
/// response has been sent.
pub fn map_error_to_http_status(err: &QueryError, default: u16) -> u16 {
    status_for_code(err.code(), default)
}

pub(crate) fn status_for_code(code: i32, default: u16) -> u16 {
    match code {
        1000 => 403,
        1010 => 405,
        1020 | 1030 | 1040 | 1050 | 1060 | 1065 | 1070 => 400,
        1120 => 406,
        3000 => 400,
        4000 | 4040 => 404,
        4300 => 409,
        5000 => 500,
        10000 => 401,
        _ => default,
    }
}
