/// Primary key of a document, as produced by a primary index
pub type DocumentKey = String;

/// Identifier of one query request
pub type RequestId = String;

/// Default number of buffers kept by a buffer pool
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Default capacity of one response buffer in bytes (64KB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;
