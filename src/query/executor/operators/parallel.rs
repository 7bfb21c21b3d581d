// Parallel Operator
//
// Runs several copies of its child over the same input channel, all
// writing to the same output channel. No order is kept across copies.

use std::sync::Arc;
use std::thread;

use crossbeam::channel;
use crossbeam::select;
use log::error;
use parking_lot::Mutex;

use crate::query::executor::context::Context;
use crate::query::executor::item::Item;
use crate::query::executor::operators::{Operator, OperatorBase, OperatorKind};
use crate::query::executor::result::QueryError;

pub struct Parallel {
    base: OperatorBase,
    child: Arc<dyn Operator>,
    max_parallelism: Option<usize>,
    /// Copies started by this instance; stops are forwarded to them
    copies: Mutex<Vec<Arc<dyn Operator>>>,
}

impl Parallel {
    pub fn new(child: Arc<dyn Operator>, max_parallelism: Option<usize>) -> Self {
        Self {
            base: OperatorBase::new(OperatorKind::Parallel),
            child,
            max_parallelism,
            copies: Mutex::new(Vec::new()),
        }
    }

    pub fn child(&self) -> &Arc<dyn Operator> {
        &self.child
    }

    fn run_copies(&self, context: &Arc<Context>, parent: Option<&Item>) {
        let n = self
            .max_parallelism
            .unwrap_or(context.config().max_parallelism)
            .max(1);
        let input = self.base.input();
        let output = self.base.output();
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let parent = parent.cloned();

        let mut handles = Vec::with_capacity(n);
        for i in 0..n {
            let copy = self.child.copy();
            if let Some(input) = &input {
                copy.base().set_input(input.clone());
            }
            if let Some(output) = &output {
                copy.base().set_output(output.clone());
            }
            copy.base().set_done(done_tx.clone());

            let running = Arc::clone(&copy);
            let copy_context = Arc::clone(context);
            let copy_parent = parent.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", copy.kind().name(), i))
                .spawn(move || copy.run_once(&copy_context, copy_parent.as_ref()));
            match spawned {
                Ok(handle) => {
                    self.copies.lock().push(running);
                    handles.push(handle);
                }
                Err(err) => {
                    context.fatal(QueryError::Internal(format!("cannot start parallel operator: {}", err)));
                    break;
                }
            }
        }
        drop(input);
        drop(output);
        drop(done_tx);

        // Every copy drops its done sender when it closes
        let stop = self.base.stop_signal();
        if !stop.is_fired() {
            select! {
                recv(done_rx) -> _ => {}
                recv(stop.receiver()) -> _ => {}
            }
        }
        if stop.is_fired() {
            self.copies.lock().iter().for_each(|copy| copy.send_stop());
        }

        for handle in handles {
            if handle.join().is_err() {
                error!("parallel copy exited abnormally");
            }
        }
    }
}

impl Operator for Parallel {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_once(&self, context: &Arc<Context>, parent: Option<&Item>) {
        self.base.run_once(context, || self.run_copies(context, parent));
    }

    fn copy(&self) -> Arc<dyn Operator> {
        Arc::new(Self::new(self.child.copy(), self.max_parallelism))
    }

    fn send_stop(&self) {
        self.base.send_stop();
        for copy in self.copies.lock().iter() {
            copy.send_stop();
        }
    }

    fn timings(&self) -> serde_json::Value {
        let mut timings = self.base.timings_json();
        timings["~children"] = self.copies.lock().iter().map(|copy| copy.timings()).collect();
        timings
    }
}
