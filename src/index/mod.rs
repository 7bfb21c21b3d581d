// Index Module
//
// The storage-side collaborator of the execution pipeline: index scans that
// stream entries over an `IndexConnection`, and keyspaces that fetch
// documents by primary key.

pub mod connection;
pub mod entry;
pub mod error;
pub mod memory;

use serde_json::Value;

pub use self::connection::IndexConnection;
pub use self::entry::{
    AggregateKind, GroupAggregates, Inclusion, IndexEntry, IndexKeyOrder, IndexProjection, Range,
    ScanConsistency, ScanVector, Span,
};
pub use self::error::IndexError;
pub use self::memory::{MemoryIndex, ScanCall, ScanFault};

/// A primary index that can stream its entries.
///
/// Both scan methods run synchronously on a producer thread owned by the
/// caller. An implementation pushes entries with
/// [`IndexConnection::send_entry`] (stopping as soon as it returns false),
/// may flag a storage deadline with [`IndexConnection::set_timeout`] and
/// reports faults through [`IndexConnection::error`]. The calling producer
/// thread closes the connection once the method returns, so implementations
/// must not keep using the connection afterwards.
pub trait PrimaryIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Keyspace this index belongs to
    fn keyspace_id(&self) -> &str;

    /// Full scan in native key order, honouring offset, limit, ordering and
    /// index-side aggregation.
    #[allow(clippy::too_many_arguments)]
    fn scan_entries(
        &self,
        request_id: &str,
        projection: Option<&IndexProjection>,
        offset: i64,
        limit: i64,
        group_aggs: Option<&GroupAggregates>,
        order: &[IndexKeyOrder],
        consistency: ScanConsistency,
        vector: Option<&ScanVector>,
        conn: &IndexConnection,
    );

    /// Range scan, used to resume a timed out scan after a known key
    #[allow(clippy::too_many_arguments)]
    fn scan(
        &self,
        request_id: &str,
        span: &Span,
        distinct: bool,
        limit: i64,
        consistency: ScanConsistency,
        vector: Option<&ScanVector>,
        conn: &IndexConnection,
    );
}

/// Document source used by fetch operators
pub trait Keyspace: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch documents by key. Missing keys are simply absent from the result.
    fn fetch(&self, keys: &[String]) -> error::Result<Vec<(String, Value)>>;
}
