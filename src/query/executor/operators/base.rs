// Operator Base
//
// Lifecycle state shared by every concrete operator: the run-once guard,
// the private stop signal, the item channels it was wired with, the stop
// signals of its upstream neighbours and its execution timings.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender};
use crossbeam::select;
use log::debug;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::common::{StopSignal, format_duration};
use crate::index::{IndexConnection, IndexEntry};
use crate::query::executor::context::Context;
use crate::query::executor::item::Item;
use crate::query::executor::operators::OperatorKind;
use crate::query::executor::phase::Phase;

/// Lifecycle of one operator instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    Idle,
    Active,
    Closed,
}

/// What a scan got when it asked its connection for the next entry
#[derive(Debug)]
pub enum EntryEvent {
    Entry(IndexEntry),
    /// The producer closed the entry channel
    Closed,
    /// The operator or the request was stopped
    Stopped,
}

pub struct OperatorBase {
    kind: OperatorKind,
    state: Mutex<OperatorState>,
    started: AtomicBool,
    stop: StopSignal,
    input: Mutex<Option<Receiver<Item>>>,
    output: Mutex<Option<Sender<Item>>>,
    /// Signals fired when this operator closes, so producers feeding it stop
    upstream: Mutex<Vec<StopSignal>>,
    /// Dropped on close; lets the pipeline driver wait for the terminal stage
    done: Mutex<Option<Sender<()>>>,
    exec_nanos: AtomicU64,
    wait_nanos: AtomicU64,
    items_in: AtomicU64,
    items_out: AtomicU64,
}

impl OperatorBase {
    /// Create an idle operator base of the given kind
    pub fn new(kind: OperatorKind) -> Self {
        Self {
            kind,
            state: Mutex::new(OperatorState::Idle),
            started: AtomicBool::new(false),
            stop: StopSignal::new(),
            input: Mutex::new(None),
            output: Mutex::new(None),
            upstream: Mutex::new(Vec::new()),
            done: Mutex::new(None),
            exec_nanos: AtomicU64::new(0),
            wait_nanos: AtomicU64::new(0),
            items_in: AtomicU64::new(0),
            items_out: AtomicU64::new(0),
        }
    }

    /// Fresh base of the same kind: new signal, no channels, no history
    pub fn copy(&self) -> Self {
        Self::new(self.kind)
    }

    /// Kind of the owning operator
    pub fn kind(&self) -> OperatorKind {
        self.kind
    }

    /// Current lifecycle state
    pub fn state(&self) -> OperatorState {
        *self.state.lock()
    }

    // Wiring, done by the pipeline builder before the operator starts

    /// Attach the channel this operator reads items from
    pub fn set_input(&self, input: Receiver<Item>) {
        *self.input.lock() = Some(input);
    }

    /// Attach the channel this operator sends items to
    pub fn set_output(&self, output: Sender<Item>) {
        *self.output.lock() = Some(output);
    }

    /// Register a producer to stop when this operator closes
    pub fn add_upstream(&self, signal: StopSignal) {
        self.upstream.lock().push(signal);
    }

    /// Attach the completion sender dropped on close
    pub fn set_done(&self, done: Sender<()>) {
        *self.done.lock() = Some(done);
    }

    /// Input channel, if wired
    pub fn input(&self) -> Option<Receiver<Item>> {
        self.input.lock().clone()
    }

    /// Output channel, if wired
    pub fn output(&self) -> Option<Sender<Item>> {
        self.output.lock().clone()
    }

    /// Handle to this operator's stop signal
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    // Lifecycle

    /// Execute `body` at most once. The operator is Active while the body
    /// runs and Closed afterwards, whether the body returned or panicked;
    /// closing records the phase time and notifies upstream operators.
    pub fn run_once<F: FnOnce()>(&self, context: &Context, body: F) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock() = OperatorState::Active;
        if let Some(phase) = self.kind.phase() {
            context.add_phase_operator(phase);
        }
        debug!("{} active", self.kind.name());

        let _guard = CloseGuard {
            base: self,
            context,
            started: Instant::now(),
        };
        context.recover(self.kind.name(), body);
    }

    /// Request cooperative cancellation. Never blocks and may be called any
    /// number of times, before or after the operator ran.
    pub fn send_stop(&self) {
        self.stop.fire();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_fired()
    }

    fn stopping(&self, context: &Context) -> bool {
        self.stop.is_fired() || context.is_cancelled()
    }

    /// Stop upstream producers and release this operator's channel ends
    fn notify(&self) {
        for signal in self.upstream.lock().drain(..) {
            signal.fire();
        }
        self.input.lock().take();
        self.output.lock().take();
        self.done.lock().take();
    }

    // Channel traffic. Every blocking point also waits on the operator's
    // own stop signal and the request's cancellation.

    /// Next item from `input`; `None` once the input is exhausted or the
    /// operator has to stop
    pub fn get_item(&self, context: &Context, input: &Receiver<Item>) -> Option<Item> {
        if self.stopping(context) {
            return None;
        }
        let started = Instant::now();
        let item = select! {
            recv(input) -> msg => msg.ok(),
            recv(self.stop.receiver()) -> _ => None,
            recv(context.cancel_signal().receiver()) -> _ => None,
        };
        self.add_wait(started.elapsed());
        if item.is_some() {
            self.items_in.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Forward an item downstream; false means the downstream is gone or
    /// the operator has to stop
    pub fn send_item(&self, context: &Context, output: &Sender<Item>, item: Item) -> bool {
        if self.stopping(context) {
            return false;
        }
        let started = Instant::now();
        let sent = select! {
            send(output, item) -> res => res.is_ok(),
            recv(self.stop.receiver()) -> _ => false,
            recv(context.cancel_signal().receiver()) -> _ => false,
        };
        self.add_wait(started.elapsed());
        if sent {
            self.items_out.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    /// Next entry from an index connection
    pub fn get_entry(&self, context: &Context, conn: &IndexConnection) -> EntryEvent {
        if self.stopping(context) {
            return EntryEvent::Stopped;
        }
        let started = Instant::now();
        let event = select! {
            recv(conn.entry_channel()) -> msg => match msg {
                Ok(entry) => EntryEvent::Entry(entry),
                Err(_) => EntryEvent::Closed,
            },
            recv(self.stop.receiver()) -> _ => EntryEvent::Stopped,
            recv(context.cancel_signal().receiver()) -> _ => EntryEvent::Stopped,
        };
        self.add_wait(started.elapsed());
        event
    }

    /// Count an item emitted without going through an item channel
    pub fn add_item_out(&self) {
        self.items_out.fetch_add(1, Ordering::Relaxed);
    }

    fn add_wait(&self, elapsed: Duration) {
        self.wait_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn items_in(&self) -> u64 {
        self.items_in.load(Ordering::Relaxed)
    }

    pub fn items_out(&self) -> u64 {
        self.items_out.load(Ordering::Relaxed)
    }

    /// `#operator` / `#stats` entry for the profile's execution timings
    pub fn timings_json(&self) -> Value {
        let exec = Duration::from_nanos(self.exec_nanos.load(Ordering::Relaxed));
        let wait = Duration::from_nanos(self.wait_nanos.load(Ordering::Relaxed));
        json!({
            "#operator": self.kind.name(),
            "#stats": {
                "#itemsIn": self.items_in(),
                "#itemsOut": self.items_out(),
                "execTime": format_duration(exec.saturating_sub(wait)),
                "kernTime": format_duration(wait),
                "state": format!("{:?}", self.state()).to_lowercase(),
            },
        })
    }
}

/// Batches phase document counts so that operators touch the shared
/// counters once every `phase_update_count` items. Pending counts are
/// flushed when the counter is dropped.
pub struct PhaseCounter<'a> {
    context: &'a Context,
    phase: Phase,
    pending: u64,
}

impl<'a> PhaseCounter<'a> {
    pub fn new(context: &'a Context, phase: Phase) -> Self {
        Self {
            context,
            phase,
            pending: 0,
        }
    }

    pub fn add(&mut self, count: u64) {
        self.pending += count;
        if self.pending > self.context.config().phase_update_count {
            self.flush();
        }
    }

    pub fn flush(&mut self) {
        if self.pending > 0 {
            self.context.add_phase_count(self.phase, self.pending);
            self.pending = 0;
        }
    }
}

impl Drop for PhaseCounter<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

struct CloseGuard<'a> {
    base: &'a OperatorBase,
    context: &'a Context,
    started: Instant,
}

impl Drop for CloseGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        self.base
            .exec_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        if let Some(phase) = self.base.kind.phase() {
            self.context.add_phase_time(phase, elapsed);
        }
        *self.base.state.lock() = OperatorState::Closed;
        self.base.notify();
        debug!("{} closed", self.base.kind.name());
    }
}
