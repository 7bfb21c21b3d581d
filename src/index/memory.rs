// In-memory primary index
//
// Backs the demo binary, the benches and the tests. Scans can be scripted to
// time out or fail so that the pipeline's recovery paths can be exercised.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};

use crate::index::connection::IndexConnection;
use crate::index::entry::{
    AggregateKind, GroupAggregates, IndexEntry, IndexKeyOrder, IndexProjection, ScanConsistency,
    ScanVector, Span,
};
use crate::index::error::{self, IndexError};
use crate::index::{Keyspace, PrimaryIndex};

/// Scripted misbehaviour for one scan call
#[derive(Debug, Clone, PartialEq)]
pub enum ScanFault {
    /// Flag a storage timeout once this many entries have been produced
    /// (only if more entries remain)
    TimeoutAfter(usize),
    /// Report a storage error without producing anything
    Fail(String),
}

/// A scan request as received by the index
#[derive(Debug, Clone, PartialEq)]
pub enum ScanCall {
    Entries { offset: i64, limit: i64 },
    Range { low: Option<String>, inclusive: bool, limit: i64 },
}

/// Primary index and keyspace over an ordered in-memory map
pub struct MemoryIndex {
    name: String,
    keyspace: String,
    documents: RwLock<BTreeMap<String, Value>>,
    /// Faults applied to successive scan calls; `None` means a clean scan
    faults: Mutex<VecDeque<Option<ScanFault>>>,
    fetch_fault: Mutex<Option<String>>,
    entry_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<ScanCall>>,
    produced: AtomicUsize,
}

impl MemoryIndex {
    pub fn new(keyspace: &str) -> Self {
        Self {
            name: format!("#primary({})", keyspace),
            keyspace: keyspace.to_string(),
            documents: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(VecDeque::new()),
            fetch_fault: Mutex::new(None),
            entry_delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            produced: AtomicUsize::new(0),
        }
    }

    pub fn with_documents<I>(keyspace: &str, documents: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let index = Self::new(keyspace);
        index.documents.write().extend(documents);
        index
    }

    pub fn insert(&self, key: impl Into<String>, document: Value) {
        self.documents.write().insert(key.into(), document);
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Queue faults for the next scan calls, in call order
    pub fn script_faults(&self, faults: Vec<Option<ScanFault>>) {
        self.faults.lock().extend(faults);
    }

    pub fn fail_fetches(&self, reason: &str) {
        *self.fetch_fault.lock() = Some(reason.to_string());
    }

    /// Sleep before producing each entry
    pub fn set_entry_delay(&self, delay: Duration) {
        *self.entry_delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<ScanCall> {
        self.calls.lock().clone()
    }

    /// Total entries handed to connections so far
    pub fn entries_produced(&self) -> usize {
        self.produced.load(Ordering::Acquire)
    }

    fn next_fault(&self) -> Option<ScanFault> {
        self.faults.lock().pop_front().flatten()
    }

    fn produce<I>(&self, conn: &IndexConnection, entries: I, fault: Option<ScanFault>)
    where
        I: Iterator<Item = IndexEntry>,
    {
        let timeout_after = match fault {
            Some(ScanFault::TimeoutAfter(n)) => Some(n),
            _ => None,
        };
        let delay = *self.entry_delay.lock();

        let mut sent = 0;
        for entry in entries {
            if timeout_after == Some(sent) {
                conn.set_timeout();
                return;
            }
            if let Some(delay) = delay {
                thread::sleep(delay);
            }
            if !conn.send_entry(entry) {
                return;
            }
            sent += 1;
            self.produced.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn scan_failed(&self, reason: String) -> IndexError {
        IndexError::ScanFailed {
            index: self.name.clone(),
            reason,
        }
    }
}

fn take_count(limit: i64) -> usize {
    usize::try_from(limit.max(0)).unwrap_or(usize::MAX)
}

fn project(key: String, projection: Option<&IndexProjection>) -> IndexEntry {
    let entry_key = match projection {
        Some(p) if p.entry_keys.contains(&0) => vec![Value::String(key.clone())],
        _ => Vec::new(),
    };
    IndexEntry::new(key).with_entry_key(entry_key)
}

fn aggregate(keys: &[String], group_aggs: &GroupAggregates) -> IndexEntry {
    let values = group_aggs
        .aggregates
        .iter()
        .map(|kind| match kind {
            AggregateKind::Count => json!(keys.len()),
            AggregateKind::Min => keys.first().map_or(Value::Null, |k| json!(k)),
            AggregateKind::Max => keys.last().map_or(Value::Null, |k| json!(k)),
        })
        .collect();
    IndexEntry::new(String::new()).with_entry_key(values)
}

impl PrimaryIndex for MemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn keyspace_id(&self) -> &str {
        &self.keyspace
    }

    fn scan_entries(
        &self,
        _request_id: &str,
        projection: Option<&IndexProjection>,
        offset: i64,
        limit: i64,
        group_aggs: Option<&GroupAggregates>,
        order: &[IndexKeyOrder],
        _consistency: ScanConsistency,
        _vector: Option<&ScanVector>,
        conn: &IndexConnection,
    ) {
        self.calls.lock().push(ScanCall::Entries { offset, limit });
        let fault = self.next_fault();
        if let Some(ScanFault::Fail(reason)) = &fault {
            conn.error(self.scan_failed(reason.clone()));
            return;
        }

        let keys: Vec<String> = self.documents.read().keys().cloned().collect();
        if let Some(group_aggs) = group_aggs {
            self.produce(conn, std::iter::once(aggregate(&keys, group_aggs)), fault);
            return;
        }

        let desc = order.first().is_some_and(|o| o.desc);
        let ordered: Box<dyn Iterator<Item = String>> = if desc {
            Box::new(keys.into_iter().rev())
        } else {
            Box::new(keys.into_iter())
        };
        let entries = ordered
            .skip(take_count(offset))
            .take(take_count(limit))
            .map(|key| project(key, projection));
        self.produce(conn, entries, fault);
    }

    fn scan(
        &self,
        _request_id: &str,
        span: &Span,
        _distinct: bool,
        limit: i64,
        _consistency: ScanConsistency,
        _vector: Option<&ScanVector>,
        conn: &IndexConnection,
    ) {
        let low = span.range.low.first().and_then(Value::as_str).map(str::to_string);
        let high = span.range.high.first().and_then(Value::as_str).map(str::to_string);
        let inclusion = span.range.inclusion;
        self.calls.lock().push(ScanCall::Range {
            low: low.clone(),
            inclusive: inclusion.includes_low(),
            limit,
        });
        let fault = self.next_fault();
        if let Some(ScanFault::Fail(reason)) = &fault {
            conn.error(self.scan_failed(reason.clone()));
            return;
        }

        let lower = match low {
            Some(k) if inclusion.includes_low() => Bound::Included(k),
            Some(k) => Bound::Excluded(k),
            None => Bound::Unbounded,
        };
        let upper = match high {
            Some(k) if inclusion.includes_high() => Bound::Included(k),
            Some(k) => Bound::Excluded(k),
            None => Bound::Unbounded,
        };
        let keys: Vec<String> = self
            .documents
            .read()
            .range::<String, _>((lower, upper))
            .map(|(k, _)| k.clone())
            .take(take_count(limit))
            .collect();
        self.produce(conn, keys.into_iter().map(IndexEntry::new), fault);
    }
}

impl Keyspace for MemoryIndex {
    fn name(&self) -> &str {
        &self.keyspace
    }

    fn fetch(&self, keys: &[String]) -> error::Result<Vec<(String, Value)>> {
        if let Some(reason) = self.fetch_fault.lock().clone() {
            return Err(IndexError::FetchFailed {
                keyspace: self.keyspace.clone(),
                reason,
            });
        }
        let documents = self.documents.read();
        Ok(keys
            .iter()
            .filter_map(|k| documents.get(k).map(|doc| (k.clone(), doc.clone())))
            .collect())
    }
}
