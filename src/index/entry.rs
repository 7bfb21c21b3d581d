// Index entries and scan arguments
//
// These are the values exchanged with the storage collaborator: the entries a
// scan produces and the ranges, projections and orderings a scan request
// carries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::types::DocumentKey;

/// One storage cursor record: a primary key plus optional projected values.
///
/// Entries double as resumption tokens for chunked rescans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(rename = "key")]
    pub entry_key: Vec<Value>,
    #[serde(rename = "primaryKey")]
    pub primary_key: DocumentKey,
}

impl IndexEntry {
    pub fn new(primary_key: impl Into<DocumentKey>) -> Self {
        Self {
            entry_key: Vec::new(),
            primary_key: primary_key.into(),
        }
    }

    pub fn with_entry_key(mut self, entry_key: Vec<Value>) -> Self {
        self.entry_key = entry_key;
        self
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{{\"primaryKey\": {:?}}}", self.primary_key),
        }
    }
}

/// Which bounds of a [`Range`] are part of the range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Inclusion {
    #[default]
    Neither,
    Low,
    High,
    Both,
}

impl Inclusion {
    pub fn includes_low(self) -> bool {
        matches!(self, Inclusion::Low | Inclusion::Both)
    }

    pub fn includes_high(self) -> bool {
        matches!(self, Inclusion::High | Inclusion::Both)
    }
}

/// Key range of a scan. Empty bounds are unbounded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Range {
    pub low: Vec<Value>,
    pub high: Vec<Value>,
    pub inclusion: Inclusion,
}

/// A scan span over an index
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Span {
    pub range: Range,
}

impl Span {
    /// Span starting strictly after `key` with no upper bound
    pub fn after_key(key: &str) -> Self {
        Span {
            range: Range {
                low: vec![Value::String(key.to_string())],
                high: Vec::new(),
                inclusion: Inclusion::Neither,
            },
        }
    }
}

/// Consistency requested from the index for one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScanConsistency {
    #[default]
    NotBounded,
    RequestPlus,
    AtPlus,
}

/// Per-partition sequence numbers an `AtPlus` scan must have caught up with
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanVector {
    pub entries: BTreeMap<u32, u64>,
}

/// Which index keys a scan should return with each entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexProjection {
    /// Positions of the index keys to project (0 is the primary key)
    pub entry_keys: Vec<usize>,
    pub primary_key: bool,
}

/// Ordering the index must deliver entries in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKeyOrder {
    pub key_pos: usize,
    pub desc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateKind {
    Count,
    Min,
    Max,
}

/// Aggregates computed by the index itself. Each group comes back as one
/// entry whose entry key holds the aggregate values in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupAggregates {
    pub aggregates: Vec<AggregateKind>,
}
