// Output contract
//
// What the pipeline needs from the terminal consumer of a request. The
// response layer implements it; tests substitute lighter sinks.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::select;
use parking_lot::Mutex;
use serde_json::Value;

use crate::query::executor::context::Context;
use crate::query::executor::item::Item;
use crate::query::executor::pipeline::RunningPipeline;
use crate::query::executor::result::QueryError;

/// Overall state of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Running,
    Completed,
    Success,
    Errors,
    Stopped,
    Closed,
    Timeout,
    Fatal,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Running => "running",
            State::Completed => "completed",
            State::Success => "success",
            State::Errors => "errors",
            State::Stopped => "stopped",
            State::Closed => "closed",
            State::Timeout => "timeout",
            State::Fatal => "fatal",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal consumer of a request's results
pub trait Output: Send + Sync {
    /// Deliver one result. Returns false once the output has been halted;
    /// callers must stop producing.
    fn result(&self, item: &Item) -> bool;

    fn error(&self, err: QueryError);

    fn warning(&self, warning: QueryError);

    /// Record a fatal error; the request can no longer complete normally
    fn fail(&self, err: QueryError);

    /// Whether results are still being accepted
    fn halted(&self) -> bool;

    fn add_mutation_count(&self, count: u64);

    fn add_sort_count(&self, count: u64);

    /// Drive a started pipeline to completion and write the response
    fn execute(&self, context: &Context, pipeline: RunningPipeline, signature: Option<&Value>);

    /// Terminate the request because its deadline passed
    fn expire(&self, state: State, timeout: Duration);
}

/// In-memory output that keeps every result. Used where no client document
/// is needed, such as embedding the pipeline or benchmarking it.
pub struct CollectingOutput {
    items: Mutex<Vec<Item>>,
    errors: Mutex<Vec<QueryError>>,
    warnings: Mutex<Vec<QueryError>>,
    state: Mutex<State>,
    /// Results accepted before the output halts itself
    capacity: Option<usize>,
    mutations: AtomicU64,
    sorts: AtomicU64,
}

impl CollectingOutput {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            warnings: Mutex::new(Vec::new()),
            state: Mutex::new(State::Running),
            capacity: None,
            mutations: AtomicU64::new(0),
            sorts: AtomicU64::new(0),
        }
    }

    /// Output that refuses every result after the first `capacity`
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    pub fn items(&self) -> Vec<Item> {
        self.items.lock().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.items
            .lock()
            .iter()
            .filter_map(|item| item.key().map(str::to_string))
            .collect()
    }

    pub fn errors(&self) -> Vec<QueryError> {
        self.errors.lock().clone()
    }

    pub fn warnings(&self) -> Vec<QueryError> {
        self.warnings.lock().clone()
    }

    pub fn state(&self) -> State {
        *self.state.lock()
    }

    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    pub fn sort_count(&self) -> u64 {
        self.sorts.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: State) {
        let mut current = self.state.lock();
        if *current == State::Running {
            *current = state;
        }
    }
}

impl Default for CollectingOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for CollectingOutput {
    fn result(&self, item: &Item) -> bool {
        if self.halted() {
            return false;
        }
        let mut items = self.items.lock();
        if self.capacity.is_some_and(|capacity| items.len() >= capacity) {
            drop(items);
            self.set_state(State::Stopped);
            return false;
        }
        items.push(item.clone());
        true
    }

    fn error(&self, err: QueryError) {
        self.errors.lock().push(err);
    }

    fn warning(&self, warning: QueryError) {
        let mut warnings = self.warnings.lock();
        if warning.is_once_only() && warnings.contains(&warning) {
            return;
        }
        warnings.push(warning);
    }

    fn fail(&self, err: QueryError) {
        self.errors.lock().push(err);
        *self.state.lock() = State::Fatal;
    }

    fn halted(&self) -> bool {
        self.state() != State::Running
    }

    fn add_mutation_count(&self, count: u64) {
        self.mutations.fetch_add(count, Ordering::Relaxed);
    }

    fn add_sort_count(&self, count: u64) {
        self.sorts.fetch_add(count, Ordering::Relaxed);
    }

    fn execute(&self, context: &Context, pipeline: RunningPipeline, _signature: Option<&Value>) {
        select! {
            recv(pipeline.done()) -> _ => {}
            recv(context.cancel_signal().receiver()) -> _ => {}
        }
        pipeline.teardown();
        self.set_state(State::Completed);
    }

    fn expire(&self, state: State, _timeout: Duration) {
        self.set_state(state);
    }
}
