//! Transport abstraction: a blocking, bidirectional bulk byte pipe.
//!
//! Concrete implementations:
//! - USB bulk endpoints ([`UsbTransport`](super::usb::UsbTransport),
//!   feature `usb`)
//! - In-memory script ([`MockTransport`]) for tests and stub development
//!
//! A transport moves exactly one chunk per call. Splitting payloads into
//! chunks is the [`Channel`](super::channel::Channel)'s job, so adding a
//! new transport requires zero changes to the command layer.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::error::TransportError;

/// Chunk-oriented blocking transport.
pub trait Transport {
    /// Write one chunk, blocking up to `timeout`.
    /// Returns the number of bytes the far side accepted.
    fn write_chunk(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Read at most `buf.len()` bytes, blocking up to `timeout`.
    /// Returns the number of bytes actually read.
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_chunk(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        (**self).write_chunk(data, timeout)
    }

    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        (**self).read_chunk(buf, timeout)
    }
}

// ── Mock transport ───────────────────────────────────────────

#[derive(Debug, Default)]
struct MockState {
    inbound: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    reads: Vec<usize>,
    timeouts: Vec<Duration>,
    fail_writes_after: Option<usize>,
}

/// Scripted in-memory transport.
///
/// Responses queued with [`push_response`](Self::push_response) are served
/// to reads in order; every write is recorded chunk by chunk. Clones share
/// state, so a test can keep one handle for inspection after handing the
/// other to a [`Channel`](super::channel::Channel). Reading from an empty
/// queue reports [`TransportError::Timeout`].
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes the "device" will send.
    pub fn push_response(&self, bytes: &[u8]) {
        self.state.borrow_mut().inbound.extend(bytes.iter().copied());
    }

    /// Append a result word.
    pub fn push_result(&self, value: u32) {
        self.push_response(&value.to_le_bytes());
    }

    /// Fail every write after `n` more successful chunk writes.
    pub fn fail_writes_after(&self, n: usize) {
        self.state.borrow_mut().fail_writes_after = Some(n);
    }

    /// Every chunk written so far, in order.
    pub fn write_chunks(&self) -> Vec<Vec<u8>> {
        self.state.borrow().writes.clone()
    }

    /// All written bytes concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().writes.concat()
    }

    /// Requested size of every read call, in order.
    pub fn read_requests(&self) -> Vec<usize> {
        self.state.borrow().reads.clone()
    }

    /// Timeout passed to every chunk call, writes and reads interleaved.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.state.borrow().timeouts.clone()
    }

    /// Bytes queued but not yet consumed.
    pub fn pending_inbound(&self) -> usize {
        self.state.borrow().inbound.len()
    }

    /// Forget recorded traffic (queued responses are kept).
    pub fn clear_log(&self) {
        let mut state = self.state.borrow_mut();
        state.writes.clear();
        state.reads.clear();
        state.timeouts.clear();
    }
}

impl Transport for MockTransport {
    fn write_chunk(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        let mut state = self.state.borrow_mut();
        state.timeouts.push(timeout);
        if let Some(remaining) = state.fail_writes_after.as_mut() {
            if *remaining == 0 {
                return Err(TransportError::Io);
            }
            *remaining -= 1;
        }
        state.writes.push(data.to_vec());
        Ok(data.len())
    }

    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let mut state = self.state.borrow_mut();
        state.timeouts.push(timeout);
        state.reads.push(buf.len());
        if state.inbound.is_empty() {
            return Err(TransportError::Timeout);
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
