// Primary Scan Operator
//
// Drives a full scan of a primary index and turns every index entry into a
// keyed item. When the storage side gives up on a scan because of its own
// deadline, the scan is resumed in chunks after the last delivered key, as
// long as the result can be stitched together without reordering or
// re-offsetting it.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Sender;
use log::{debug, error, warn};

use crate::index::{IndexConnection, IndexEntry, Span};
use crate::query::executor::context::Context;
use crate::query::executor::item::Item;
use crate::query::executor::operators::{EntryEvent, Operator, OperatorBase, OperatorKind};
use crate::query::executor::phase::Phase;
use crate::query::executor::result::{QueryError, QueryResult};
use crate::query::planner::expression::eval_limit_offset;
use crate::query::planner::plan::PrimaryScanPlan;

pub struct PrimaryScan {
    base: OperatorBase,
    plan: Arc<PrimaryScanPlan>,
}

/// One request to the index
#[derive(Debug, Clone)]
enum ScanAttempt {
    Full { offset: i64, limit: i64 },
    /// Everything strictly after `after`, at most `limit` entries
    Chunk { after: IndexEntry, limit: i64 },
}

#[derive(Debug)]
enum AttemptEnd {
    /// Channel closed normally or the limit was reached
    Finished,
    /// Downstream refused an item or the scan was stopped
    Stopped,
    /// Storage closed the channel after flagging its deadline
    TimedOut,
    Failed(QueryError),
}

struct AttemptOutcome {
    delivered: u64,
    last: Option<IndexEntry>,
    end: AttemptEnd,
}

impl PrimaryScan {
    pub fn new(plan: Arc<PrimaryScanPlan>) -> Self {
        Self {
            base: OperatorBase::new(OperatorKind::PrimaryScan),
            plan,
        }
    }

    pub fn plan(&self) -> &Arc<PrimaryScanPlan> {
        &self.plan
    }

    fn scan_primary(&self, context: &Arc<Context>, parent: Option<&Item>) {
        let Some(output) = self.base.output() else {
            context.error(QueryError::Plan("primary scan has no consumer".into()));
            return;
        };
        let bounds = eval_limit_offset(self.plan.offset(), parent, 0, context).and_then(|offset| {
            eval_limit_offset(self.plan.limit(), parent, i64::MAX, context).map(|limit| (offset, limit))
        });
        let (offset, limit) = match bounds {
            Ok(bounds) => bounds,
            Err(err) => {
                context.error(err);
                return;
            }
        };

        let mut remaining = limit;
        let mut attempt = ScanAttempt::Full { offset, limit };
        loop {
            let outcome = self.run_attempt(context, &output, &attempt, remaining);
            remaining = remaining.saturating_sub(outcome.delivered as i64);

            match outcome.end {
                AttemptEnd::Finished | AttemptEnd::Stopped => return,
                AttemptEnd::Failed(err) => {
                    context.error(err);
                    return;
                }
                AttemptEnd::TimedOut => {}
            }

            // Offset, ordering and aggregates must be exact; a chunk cannot
            // be stitched onto them.
            let after = match outcome.last {
                Some(last) if offset == 0 && self.chunkable() => last,
                _ => {
                    context.error(QueryError::IndexScanTimeout);
                    return;
                }
            };
            if remaining <= 0 {
                return;
            }

            warn!(
                "{}: primary index scan timed out, resorting to chunked scan (chunk size: {}, starting entry: {})",
                self.plan.index().name(),
                outcome.delivered,
                after
            );
            context.warning(QueryError::ChunkedScan);
            attempt = ScanAttempt::Chunk {
                after,
                limit: remaining,
            };
        }
    }

    fn chunkable(&self) -> bool {
        self.plan.order_terms().is_empty() && self.plan.group_aggs().is_none()
    }

    /// Run one attempt on a fresh connection and drain it
    fn run_attempt(
        &self,
        context: &Arc<Context>,
        output: &Sender<Item>,
        attempt: &ScanAttempt,
        limit: i64,
    ) -> AttemptOutcome {
        let conn = Arc::new(IndexConnection::new(context.config().entry_channel_capacity));
        conn.set_primary();

        let producer = match self.spawn_producer(context, &conn, attempt.clone()) {
            Ok(producer) => producer,
            Err(err) => {
                return AttemptOutcome {
                    delivered: 0,
                    last: None,
                    end: AttemptEnd::Failed(err),
                };
            }
        };

        let outcome = self.drain(context, output, &conn, limit);

        // Notify the index that we have stopped
        conn.send_stop();
        if producer.join().is_err() {
            error!("{}: scan producer exited abnormally", self.plan.index().name());
        }
        outcome
    }

    fn spawn_producer(
        &self,
        context: &Arc<Context>,
        conn: &Arc<IndexConnection>,
        attempt: ScanAttempt,
    ) -> QueryResult<JoinHandle<()>> {
        let plan = Arc::clone(&self.plan);
        let context = Arc::clone(context);
        let conn = Arc::clone(conn);
        thread::Builder::new()
            .name(format!("scan-{}", plan.keyspace()))
            .spawn(move || {
                context.recover("index scan", || scan_index(&plan, &context, &conn, &attempt));
                conn.close();
            })
            .map_err(|e| QueryError::Internal(format!("cannot start index scan: {}", e)))
    }

    fn drain(
        &self,
        context: &Context,
        output: &Sender<Item>,
        conn: &IndexConnection,
        limit: i64,
    ) -> AttemptOutcome {
        let batch = context.config().phase_update_count;
        let mut delivered: u64 = 0;
        let mut docs: u64 = 0;
        let mut last = None;

        let end = loop {
            if delivered >= limit.max(0) as u64 {
                break AttemptEnd::Finished;
            }
            match self.base.get_entry(context, conn) {
                EntryEvent::Entry(entry) => {
                    if !self.base.send_item(context, output, self.new_item(&entry)) {
                        break AttemptEnd::Stopped;
                    }
                    last = Some(entry);
                    delivered += 1;
                    docs += 1;
                    if docs > batch {
                        context.add_phase_count(Phase::PrimaryScan, docs);
                        docs = 0;
                    }
                }
                EntryEvent::Closed => {
                    break match conn.take_error() {
                        Some(err) => AttemptEnd::Failed(err.into()),
                        None if conn.timed_out() => AttemptEnd::TimedOut,
                        None => AttemptEnd::Finished,
                    };
                }
                EntryEvent::Stopped => break AttemptEnd::Stopped,
            }
        };

        if docs > 0 {
            context.add_phase_count(Phase::PrimaryScan, docs);
        }
        debug!("primary scan attempt delivered {} ({:?})", delivered, end);
        AttemptOutcome {
            delivered,
            last,
            end,
        }
    }

    /// Empty document keyed by the entry, plus any covered fields
    fn new_item(&self, entry: &IndexEntry) -> Item {
        let mut item = Item::with_key(&entry.primary_key);
        for cover in self.plan.covers() {
            if let Some(value) = entry.entry_key.get(cover.entry_key_pos) {
                item.set_field(&cover.alias, value.clone());
            }
        }
        item
    }
}

/// Body of the producer thread
fn scan_index(plan: &PrimaryScanPlan, context: &Context, conn: &IndexConnection, attempt: &ScanAttempt) {
    let index = plan.index();
    let vector = context.scan_vector(plan.keyspace());
    match attempt {
        ScanAttempt::Full { offset, limit } => index.scan_entries(
            context.request_id(),
            plan.projection(),
            *offset,
            *limit,
            plan.group_aggs(),
            plan.order_terms(),
            context.consistency(),
            vector,
            conn,
        ),
        ScanAttempt::Chunk { after, limit } => index.scan(
            context.request_id(),
            &Span::after_key(&after.primary_key),
            true,
            *limit,
            context.consistency(),
            vector,
            conn,
        ),
    }
}

impl Operator for PrimaryScan {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_once(&self, context: &Arc<Context>, parent: Option<&Item>) {
        self.base.run_once(context, || self.scan_primary(context, parent));
    }

    fn copy(&self) -> Arc<dyn Operator> {
        Arc::new(Self {
            base: self.base.copy(),
            plan: Arc::clone(&self.plan),
        })
    }
}
