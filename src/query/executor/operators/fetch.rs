// Fetch Operator
//
// Replaces keyed items coming out of a scan with the full documents from
// the keyspace, a batch of keys per round trip.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam::channel::Sender;

use crate::query::executor::context::Context;
use crate::query::executor::item::Item;
use crate::query::executor::operators::{Operator, OperatorBase, OperatorKind, PhaseCounter};
use crate::query::executor::phase::Phase;
use crate::query::executor::result::QueryError;
use crate::query::planner::plan::FetchPlan;

pub struct Fetch {
    base: OperatorBase,
    plan: Arc<FetchPlan>,
}

impl Fetch {
    pub fn new(plan: Arc<FetchPlan>) -> Self {
        Self {
            base: OperatorBase::new(OperatorKind::Fetch),
            plan,
        }
    }

    fn fetch_items(&self, context: &Context) {
        let (Some(input), Some(output)) = (self.base.input(), self.base.output()) else {
            context.error(QueryError::Plan("fetch is not connected".into()));
            return;
        };
        let batch_size = context.config().fetch_batch_size.max(1);
        let mut counter = PhaseCounter::new(context, Phase::Fetch);
        let mut batch = Vec::with_capacity(batch_size);

        while let Some(item) = self.base.get_item(context, &input) {
            batch.push(item);
            if batch.len() >= batch_size && !self.flush_batch(context, &output, &mut batch, &mut counter) {
                return;
            }
        }
        if !self.base.is_stopped() && !context.is_cancelled() {
            self.flush_batch(context, &output, &mut batch, &mut counter);
        }
    }

    /// Fetch and forward one batch. Missing documents are skipped. Returns
    /// false once the operator has to stop.
    fn flush_batch(
        &self,
        context: &Context,
        output: &Sender<Item>,
        batch: &mut Vec<Item>,
        counter: &mut PhaseCounter<'_>,
    ) -> bool {
        if batch.is_empty() {
            return true;
        }
        let keys: Vec<String> = batch
            .iter()
            .filter_map(|item| item.key().map(str::to_string))
            .collect();
        let mut documents: HashMap<String, _> = match self.plan.keyspace().fetch(&keys) {
            Ok(documents) => documents.into_iter().collect(),
            Err(err) => {
                context.error(err.into());
                return false;
            }
        };
        counter.add(documents.len() as u64);

        for mut item in batch.drain(..) {
            let Some(document) = item.key().and_then(|key| documents.remove(key)) else {
                continue;
            };
            item.set_value(document);
            if !self.base.send_item(context, output, item) {
                return false;
            }
        }
        true
    }
}

impl Operator for Fetch {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_once(&self, context: &Arc<Context>, _parent: Option<&Item>) {
        self.base.run_once(context, || self.fetch_items(context));
    }

    fn copy(&self) -> Arc<dyn Operator> {
        Arc::new(Self {
            base: self.base.copy(),
            plan: Arc::clone(&self.plan),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::query::executor::output::CollectingOutput;
    use crossbeam::channel;
    use serde_json::json;

    fn setup(index: Arc<MemoryIndex>) -> (Arc<CollectingOutput>, Arc<Context>, Fetch) {
        let output = Arc::new(CollectingOutput::new());
        let context = Arc::new(Context::new("req", output.clone()));
        (output, context, Fetch::new(Arc::new(FetchPlan::new(index))))
    }

    #[test]
    fn test_fetch_replaces_values_and_skips_missing() {
        let index = Arc::new(MemoryIndex::with_documents(
            "users",
            (0..40).map(|i| (format!("u{:02}", i), json!({"n": i}))),
        ));
        let (output, context, fetch) = setup(index);
        let (in_tx, in_rx) = channel::bounded(64);
        let (out_tx, out_rx) = channel::bounded(64);
        fetch.base().set_input(in_rx);
        fetch.base().set_output(out_tx);

        for i in 0..40 {
            in_tx.send(Item::with_key(&format!("u{:02}", i))).unwrap();
        }
        in_tx.send(Item::with_key("ghost")).unwrap();
        drop(in_tx);
        fetch.run_once(&context, None);

        let items: Vec<Item> = out_rx.try_iter().collect();
        assert_eq!(items.len(), 40);
        assert_eq!(items[17].value(), &json!({"n": 17}));
        assert_eq!(items[17].key(), Some("u17"));
        assert_eq!(context.phases().count(Phase::Fetch), 40);
        assert!(output.errors().is_empty());
    }

    #[test]
    fn test_fetch_error_reported_once() {
        let index = Arc::new(MemoryIndex::with_documents("users", vec![("a".to_string(), json!(1))]));
        index.fail_fetches("node down");
        let (output, context, fetch) = setup(index);
        let (in_tx, in_rx) = channel::bounded(64);
        let (out_tx, out_rx) = channel::bounded(64);
        fetch.base().set_input(in_rx);
        fetch.base().set_output(out_tx);

        for _ in 0..40 {
            in_tx.send(Item::with_key("a")).unwrap();
        }
        drop(in_tx);
        fetch.run_once(&context, None);

        assert_eq!(out_rx.try_iter().count(), 0);
        assert_eq!(output.errors().len(), 1);
        assert_eq!(output.errors()[0].code(), QueryError::DATASTORE);
    }
}
