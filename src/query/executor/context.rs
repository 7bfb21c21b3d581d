// Execution Context
//
// Per-request state shared by every operator of a pipeline: arguments, scan
// consistency, phase counters, the cancellation signal and the panic
// boundary. Created when a request starts, dropped when it completes.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use log::error;
use serde_json::{Map, Value};

use crate::common::StopSignal;
use crate::common::types::RequestId;
use crate::index::{ScanConsistency, ScanVector};
use crate::query::executor::config::ExecutionConfig;
use crate::query::executor::item::Item;
use crate::query::executor::output::Output;
use crate::query::executor::phase::{Phase, PhaseTable};
use crate::query::executor::result::QueryError;

/// Shared state of one executing request
pub struct Context {
    request_id: RequestId,
    output: Arc<dyn Output>,
    config: ExecutionConfig,
    named_args: Map<String, Value>,
    positional_args: Vec<Value>,
    consistency: ScanConsistency,
    scan_vectors: HashMap<String, ScanVector>,
    phases: PhaseTable,
    cancel: StopSignal,
}

impl Context {
    pub fn new(request_id: impl Into<RequestId>, output: Arc<dyn Output>) -> Self {
        Self {
            request_id: request_id.into(),
            output,
            config: ExecutionConfig::default(),
            named_args: Map::new(),
            positional_args: Vec::new(),
            consistency: ScanConsistency::NotBounded,
            scan_vectors: HashMap::new(),
            phases: PhaseTable::new(),
            cancel: StopSignal::new(),
        }
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_named_args(mut self, args: Map<String, Value>) -> Self {
        self.named_args = args;
        self
    }

    pub fn with_positional_args(mut self, args: Vec<Value>) -> Self {
        self.positional_args = args;
        self
    }

    pub fn with_consistency(mut self, consistency: ScanConsistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_scan_vector(mut self, keyspace: &str, vector: ScanVector) -> Self {
        self.scan_vectors.insert(keyspace.to_string(), vector);
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn output(&self) -> &Arc<dyn Output> {
        &self.output
    }

    pub fn named_args(&self) -> &Map<String, Value> {
        &self.named_args
    }

    pub fn named_arg(&self, name: &str) -> Option<&Value> {
        self.named_args.get(name)
    }

    pub fn positional_args(&self) -> &[Value] {
        &self.positional_args
    }

    /// Positional parameters are numbered from 1
    pub fn positional_arg(&self, position: usize) -> Option<&Value> {
        position
            .checked_sub(1)
            .and_then(|index| self.positional_args.get(index))
    }

    pub fn consistency(&self) -> ScanConsistency {
        self.consistency
    }

    pub fn scan_vector(&self, keyspace: &str) -> Option<&ScanVector> {
        self.scan_vectors.get(keyspace)
    }

    // Phase bookkeeping

    pub fn phases(&self) -> &PhaseTable {
        &self.phases
    }

    pub fn add_phase_count(&self, phase: Phase, count: u64) {
        self.phases.add_count(phase, count);
    }

    pub fn add_phase_time(&self, phase: Phase, duration: Duration) {
        self.phases.add_time(phase, duration);
    }

    pub fn add_phase_operator(&self, phase: Phase) {
        self.phases.add_operator(phase);
    }

    // Reporting

    /// Hand a result to the output; false means stop producing
    pub fn result(&self, item: &Item) -> bool {
        self.output.result(item)
    }

    pub fn error(&self, err: QueryError) {
        self.output.error(err);
    }

    pub fn warning(&self, warning: QueryError) {
        self.output.warning(warning);
    }

    /// Report a fatal error and cancel the whole request
    pub fn fatal(&self, err: QueryError) {
        self.output.fail(err);
        self.cancel();
    }

    // Cancellation

    pub fn cancel(&self) {
        self.cancel.fire();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_fired()
    }

    pub fn cancel_signal(&self) -> &StopSignal {
        &self.cancel
    }

    /// Run `f` behind a panic boundary. A panic is logged, reported as a
    /// fatal error and cancels the request. Returns false if `f` panicked.
    pub fn recover<F: FnOnce()>(&self, name: &str, f: F) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(()) => true,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!("{} panicked (request {}): {}", name, self.request_id, msg);
                self.fatal(QueryError::Panic(msg));
                false
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
