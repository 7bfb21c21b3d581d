// Transports
//
// Where the response document goes. The writer only needs to send a status
// header once, push body bytes, flush and close; a transport also reports
// when the client has gone away.

use std::io::{self, Write};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;

use crate::common::StopSignal;

/// Client-facing side of a response
pub trait Transport: Send {
    /// Send the status line and headers. `content_length` is known only
    /// when the whole document fits in the first write.
    fn write_header(&mut self, status: u16, content_length: Option<usize>) -> io::Result<()>;

    fn write_body(&mut self, data: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;

    /// Becomes ready (or disconnected) when the client goes away
    fn close_notify(&self) -> Receiver<()>;
}

/// Transport over any byte sink, such as stdout. Headers are not written.
pub struct IoTransport<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> IoTransport<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Transport for IoTransport<W> {
    fn write_header(&mut self, _status: u16, _content_length: Option<usize>) -> io::Result<()> {
        Ok(())
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn close_notify(&self) -> Receiver<()> {
        channel::never()
    }
}

/// Everything a [`RecordingTransport`] has seen
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub status: Option<u16>,
    pub content_length: Option<usize>,
    pub header_writes: usize,
    pub body: Vec<u8>,
    /// Size of every body write, in order
    pub writes: Vec<usize>,
    pub flushes: usize,
    pub closed: bool,
}

/// In-memory transport that records what it is sent. Clones share the same
/// recording, so a test can keep one handle while the writer owns another.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    recording: Arc<Mutex<Recording>>,
    /// Client announced it is gone
    hangup: StopSignal,
    /// Writes fail
    disconnected: StopSignal,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the close notification while writes keep succeeding, as when
    /// the peer hangs up before the server notices a dead socket
    pub fn hang_up(&self) {
        self.hangup.fire();
    }

    /// Simulate the client going away; later writes fail
    pub fn disconnect(&self) {
        self.disconnected.fire();
        self.hangup.fire();
    }

    pub fn recording(&self) -> Recording {
        self.recording.lock().clone()
    }

    pub fn status(&self) -> Option<u16> {
        self.recording.lock().status
    }

    pub fn body(&self) -> Vec<u8> {
        self.recording.lock().body.clone()
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.recording.lock().body).into_owned()
    }

    /// The body parsed as one JSON document
    pub fn document(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.recording.lock().body)
    }

    pub fn is_closed(&self) -> bool {
        self.recording.lock().closed
    }

    fn check_connected(&self) -> io::Result<()> {
        if self.disconnected.is_fired() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"));
        }
        Ok(())
    }
}

impl Transport for RecordingTransport {
    fn write_header(&mut self, status: u16, content_length: Option<usize>) -> io::Result<()> {
        self.check_connected()?;
        let mut recording = self.recording.lock();
        recording.status = Some(status);
        recording.content_length = content_length;
        recording.header_writes += 1;
        Ok(())
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<()> {
        self.check_connected()?;
        let mut recording = self.recording.lock();
        recording.body.extend_from_slice(data);
        recording.writes.push(data.len());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_connected()?;
        self.recording.lock().flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.recording.lock().closed = true;
        Ok(())
    }

    fn close_notify(&self) -> Receiver<()> {
        self.hangup.receiver().clone()
    }
}
