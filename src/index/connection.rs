// Index Connection
//
// A conduit created per scan attempt. The storage side (producer) pushes
// entries into a bounded channel and closes it when done; the operator side
// (consumer) drains it and signals stop on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use log::debug;
use parking_lot::Mutex;

use crate::common::StopSignal;
use crate::index::entry::IndexEntry;
use crate::index::error::IndexError;

/// Channel-based connection between one index scan and its consumer
pub struct IndexConnection {
    /// Producer end; taken (and so closed) exactly once
    sender: Mutex<Option<Sender<IndexEntry>>>,
    receiver: Receiver<IndexEntry>,
    stop: StopSignal,
    primary: AtomicBool,
    timeout: AtomicBool,
    /// First storage fault raised during this scan
    fault: Mutex<Option<IndexError>>,
}

impl IndexConnection {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            stop: StopSignal::new(),
            primary: AtomicBool::new(false),
            timeout: AtomicBool::new(false),
            fault: Mutex::new(None),
        }
    }

    pub fn set_primary(&self) {
        self.primary.store(true, Ordering::Release);
    }

    pub fn is_primary(&self) -> bool {
        self.primary.load(Ordering::Acquire)
    }

    // Producer side

    /// Push one entry. Blocks while the channel is full; returns false once
    /// the consumer has stopped or the connection is closed.
    pub fn send_entry(&self, entry: IndexEntry) -> bool {
        if self.stop.is_fired() {
            return false;
        }
        let sender = match self.sender.lock().as_ref() {
            Some(sender) => sender.clone(),
            None => return false,
        };
        select! {
            send(sender, entry) -> res => res.is_ok(),
            recv(self.stop.receiver()) -> _ => false,
        }
    }

    /// Mark the scan as having hit the storage-side deadline. Must be called
    /// before [`IndexConnection::close`] to be observed by the consumer.
    pub fn set_timeout(&self) {
        self.timeout.store(true, Ordering::Release);
    }

    /// Record a storage fault; only the first one is kept
    pub fn error(&self, err: IndexError) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(err);
        }
    }

    /// Close the entry channel. Only the first call has any effect.
    pub fn close(&self) -> bool {
        let closed = self.sender.lock().take().is_some();
        if closed {
            debug!("index connection closed (timeout: {})", self.timed_out());
        }
        closed
    }

    /// Whether the consumer asked the producer to stop
    pub fn is_stopped(&self) -> bool {
        self.stop.is_fired()
    }

    // Consumer side

    pub fn entry_channel(&self) -> &Receiver<IndexEntry> {
        &self.receiver
    }

    pub fn stop_channel(&self) -> &StopSignal {
        &self.stop
    }

    /// Ask the producer to stop. Never blocks and may be called repeatedly.
    pub fn send_stop(&self) {
        self.stop.fire();
    }

    pub fn timed_out(&self) -> bool {
        self.timeout.load(Ordering::Acquire)
    }

    pub fn take_error(&self) -> Option<IndexError> {
        self.fault.lock().take()
    }
}
