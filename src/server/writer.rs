// Buffered Response Writer
//
// Accumulates the response document in a pooled buffer and pushes it to the
// transport in large chunks: when the buffer passes its capacity, when a
// flush interval has gone by since the previous flush, and once at the end.
// The HTTP status can change until the first byte leaves the process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error};
use parking_lot::Mutex;

use crate::common::BufferPool;
use crate::server::transport::Transport;

/// Result of appending one result item
#[derive(Debug)]
pub enum Append {
    /// Item written; carries the size of its serialized form
    Written(usize),
    /// Writer closed or transport broken; nothing was written
    Refused,
    /// Serialization failed and the partial write was rolled back
    Invalid(serde_json::Error),
}

struct WriterState {
    transport: Box<dyn Transport>,
    /// Taken (and returned to the pool) when the response completes
    buffer: Option<Vec<u8>>,
    status: u16,
    /// Header not sent yet
    header: bool,
    /// The transport failed; nothing more can be sent
    broken: bool,
    closed: bool,
    last_flush: Instant,
}

pub struct BufferedWriter {
    state: Mutex<WriterState>,
    pool: Arc<BufferPool>,
    flush_interval: Duration,
}

impl BufferedWriter {
    pub fn new(transport: Box<dyn Transport>, pool: Arc<BufferPool>, flush_interval: Duration) -> Self {
        let buffer = pool.get_buffer();
        Self {
            state: Mutex::new(WriterState {
                transport,
                buffer: Some(buffer),
                status: 200,
                header: true,
                broken: false,
                closed: false,
                last_flush: Instant::now(),
            }),
            pool,
            flush_interval,
        }
    }

    /// Change the response status. Has no effect once the header is out.
    pub fn set_status(&self, status: u16) -> bool {
        let mut state = self.state.lock();
        if !state.header {
            return false;
        }
        state.status = status;
        true
    }

    pub fn status(&self) -> u16 {
        self.state.lock().status
    }

    /// Whether any byte has been handed to the transport
    pub fn header_sent(&self) -> bool {
        !self.state.lock().header
    }

    pub fn is_closed(&self) -> bool {
        let state = self.state.lock();
        state.closed || state.broken
    }

    /// Append a string, flushing first if it would push the buffer past
    /// its capacity
    pub fn write_str(&self, s: &str) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.broken {
            return false;
        }
        if s.len() + buffered(&state) > self.pool.buffer_capacity() {
            self.flush(&mut state);
            if state.broken {
                return false;
            }
        }
        match state.buffer.as_mut() {
            Some(buf) => {
                buf.extend_from_slice(s.as_bytes());
                true
            }
            None => false,
        }
    }

    /// Append one result: `lead`, then `prefix`, then whatever `write`
    /// serializes. A failed serialization removes everything this call
    /// wrote. Flushes if the buffer ends up past its capacity.
    pub fn append_item<F>(&self, lead: &str, prefix: &str, write: F) -> Append
    where
        F: FnOnce(&mut Vec<u8>) -> serde_json::Result<()>,
    {
        let mut state = self.state.lock();
        if state.closed || state.broken {
            return Append::Refused;
        }
        let Some(buf) = state.buffer.as_mut() else {
            return Append::Refused;
        };

        let before_writes = buf.len();
        buf.extend_from_slice(lead.as_bytes());
        buf.extend_from_slice(prefix.as_bytes());
        let before_result = buf.len();
        if let Err(err) = write(buf) {
            buf.truncate(before_writes);
            return Append::Invalid(err);
        }
        let size = buf.len() - before_result;

        if buffered(&state) > self.pool.buffer_capacity() {
            self.flush(&mut state);
        }
        Append::Written(size)
    }

    /// Flush if the interval has passed, but only after a first flush has
    /// already sent the header
    pub fn time_flush(&self) {
        let mut state = self.state.lock();
        if state.closed || state.broken || state.header {
            return;
        }
        if state.last_flush.elapsed() > self.flush_interval {
            self.flush(&mut state);
        }
    }

    /// Current write position
    pub fn mark(&self) -> usize {
        buffered(&self.state.lock())
    }

    /// Drop everything written after `mark`, if it is still buffered
    pub fn truncate(&self, mark: usize) {
        if let Some(buf) = self.state.lock().buffer.as_mut() {
            if mark <= buf.len() {
                buf.truncate(mark);
            }
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.mark()
    }

    /// Finish the response: send what is buffered (with a content length if
    /// nothing has been sent yet), return the buffer to the pool and close
    /// the transport. Only the first call does anything.
    pub fn no_more_data(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let Some(buffer) = state.buffer.take() else {
            return;
        };

        if !state.broken {
            let status = state.status;
            let header = state.header;
            let transport = &mut state.transport;
            let sent = (|| {
                if header {
                    transport.write_header(status, Some(buffer.len()))?;
                }
                transport.write_body(&buffer)?;
                transport.close()
            })();
            state.header = false;
            if let Err(err) = sent {
                error!("failed to complete response: {}", err);
                state.broken = true;
            }
        }
        debug!("response complete ({} trailing bytes)", buffer.len());
        self.pool.put_buffer(buffer);
    }

    fn flush(&self, state: &mut WriterState) {
        let Some(buf) = state.buffer.as_mut() else {
            return;
        };
        let header = state.header;
        let status = state.status;
        let transport = &mut state.transport;
        let sent = (|| {
            if header {
                transport.write_header(status, None)?;
            }
            transport.write_body(buf)?;
            transport.flush()
        })();
        state.header = false;
        buf.clear();
        state.last_flush = Instant::now();
        if let Err(err) = sent {
            error!("failed to flush response: {}", err);
            state.broken = true;
        }
    }
}

fn buffered(state: &WriterState) -> usize {
    state.buffer.as_ref().map_or(0, Vec::len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::transport::RecordingTransport;
    use std::thread;

    fn writer(capacity: usize, interval: Duration) -> (RecordingTransport, BufferedWriter) {
        let transport = RecordingTransport::new();
        let pool = Arc::new(BufferPool::new(capacity, 2));
        let writer = BufferedWriter::new(Box::new(transport.clone()), pool, interval);
        (transport, writer)
    }

    #[test]
    fn test_size_flush_sends_whole_buffer_once() {
        let (transport, writer) = writer(16, Duration::from_secs(60));
        assert!(writer.write_str("0123456789"));
        let out = writer.append_item(",", "", |buf| {
            buf.extend_from_slice(b"abcdefgh");
            Ok(())
        });
        assert!(matches!(out, Append::Written(8)));

        let recording = transport.recording();
        assert_eq!(recording.writes, vec![19]);
        assert_eq!(recording.flushes, 1);
        assert_eq!(recording.status, Some(200));
        assert_eq!(recording.content_length, None);
        assert_eq!(writer.buffered_len(), 0);
    }

    #[test]
    fn test_write_str_flushes_before_overflowing() {
        let (transport, writer) = writer(8, Duration::from_secs(60));
        assert!(writer.write_str("abcdef"));
        assert!(writer.write_str("ghij"));
        assert_eq!(transport.body_string(), "abcdef");
        assert_eq!(writer.buffered_len(), 4);
    }

    #[test]
    fn test_serialization_failure_rolls_back_only_that_item() {
        let (_, writer) = writer(1024, Duration::from_secs(60));
        writer.write_str("[");
        let out = writer.append_item("\n", "  ", |buf| {
            buf.extend_from_slice(b"{\"partial\":");
            Err(serde::ser::Error::custom("bad value"))
        });
        assert!(matches!(out, Append::Invalid(_)));
        assert_eq!(writer.buffered_len(), 1);
    }

    #[test]
    fn test_status_frozen_after_first_flush() {
        let (transport, writer) = writer(4, Duration::from_secs(60));
        assert!(writer.set_status(404));
        writer.write_str("abc");
        writer.write_str("def");
        assert!(!writer.set_status(500));
        writer.no_more_data();
        assert_eq!(transport.status(), Some(404));
    }

    #[test]
    fn test_time_flush_waits_for_first_flush() {
        let (transport, writer) = writer(4, Duration::from_millis(5));
        writer.write_str("ab");
        thread::sleep(Duration::from_millis(10));
        writer.time_flush();
        assert_eq!(transport.recording().flushes, 0);

        writer.write_str("cdef");
        assert_eq!(transport.recording().flushes, 1);
        assert_eq!(transport.body_string(), "ab");

        thread::sleep(Duration::from_millis(10));
        writer.time_flush();
        assert_eq!(transport.recording().flushes, 2);
        assert_eq!(transport.body_string(), "abcdef");
    }

    #[test]
    fn test_no_more_data_sets_length_and_is_once_only() {
        let (transport, writer) = writer(1024, Duration::from_secs(60));
        writer.write_str("{\"ok\": true}");
        writer.no_more_data();
        writer.no_more_data();

        let recording = transport.recording();
        assert_eq!(recording.content_length, Some(12));
        assert_eq!(recording.header_writes, 1);
        assert_eq!(recording.writes, vec![12]);
        assert!(recording.closed);
        assert!(!writer.write_str("more"));
    }

    #[test]
    fn test_broken_transport_refuses_writes() {
        let (transport, writer) = writer(4, Duration::from_secs(60));
        transport.disconnect();
        writer.write_str("abc");
        assert!(!writer.write_str("def"));
        assert!(writer.is_closed());
        let out = writer.append_item("", "", |buf| {
            buf.push(b'1');
            Ok(())
        });
        assert!(matches!(out, Append::Refused));
    }
}
