// Stream Operator
//
// Terminal stage: hands every item to the request's output. When it exits
// the pipeline is done.

use std::sync::Arc;

use crate::query::executor::context::Context;
use crate::query::executor::item::Item;
use crate::query::executor::operators::{Operator, OperatorBase, OperatorKind, PhaseCounter};
use crate::query::executor::phase::Phase;
use crate::query::executor::result::QueryError;

pub struct Stream {
    base: OperatorBase,
}

impl Stream {
    pub fn new() -> Self {
        Self {
            base: OperatorBase::new(OperatorKind::Stream),
        }
    }

    fn stream_items(&self, context: &Context) {
        let Some(input) = self.base.input() else {
            context.error(QueryError::Plan("stream has no input".into()));
            return;
        };
        let mut counter = PhaseCounter::new(context, Phase::Stream);

        while let Some(item) = self.base.get_item(context, &input) {
            if !context.result(&item) {
                return;
            }
            self.base.add_item_out();
            counter.add(1);
        }
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for Stream {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_once(&self, context: &Arc<Context>, _parent: Option<&Item>) {
        self.base.run_once(context, || self.stream_items(context));
    }

    fn copy(&self) -> Arc<dyn Operator> {
        Arc::new(Self::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::executor::output::CollectingOutput;
    use crossbeam::channel;

    #[test]
    fn test_stream_stops_when_output_halts() {
        let output = Arc::new(CollectingOutput::with_capacity(3));
        let context = Arc::new(Context::new("req", output.clone()));
        let stream = Stream::new();
        let (in_tx, in_rx) = channel::bounded(10);
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        stream.base().set_input(in_rx);
        stream.base().set_done(done_tx);
        for i in 0..10 {
            in_tx.send(Item::with_key(&format!("k{}", i))).unwrap();
        }

        stream.run_once(&context, None);
        assert_eq!(output.keys(), vec!["k0", "k1", "k2"]);
        assert_eq!(stream.base().items_out(), 3);
        assert!(done_rx.recv().is_err());
        assert_eq!(context.phases().count(Phase::Stream), 3);
    }
}
