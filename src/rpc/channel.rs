//! Chunked channel: owns a transport and executes commands over it.
//!
//! The target moves at most `max_chunk` bytes per bulk transfer, so every
//! logical write or read is split:
//!
//! ```text
//! write(N bytes):  [max_chunk][max_chunk]...[N mod max_chunk]
//! read(N bytes):   loop read_chunk(min(left, max_chunk)) until N gathered
//! ```
//!
//! The wire carries no request id, so exactly one command may be in flight.
//! A `Channel` is not internally synchronised; it belongs to one caller.

use std::time::Duration;

use log::{debug, trace};

use super::commands::Command;
use super::result::{RESULT_SIZE, ResultCode};
use super::transport::Transport;
use super::wire::Wire;
use crate::config::ChannelConfig;
use crate::error::{Error, Result, TransportError};

pub struct Channel<T: Transport> {
    transport: T,
    timeout: Duration,
    max_chunk: usize,
    closed: bool,
}

impl<T: Transport> Channel<T> {
    pub fn new(transport: T, config: &ChannelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            timeout: config.timeout(),
            max_chunk: config.max_chunk,
            closed: false,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// Whether `Exit` has succeeded on this channel.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ── Raw byte movement ────────────────────────────────────

    /// Write `data` as `ceil(len / max_chunk)` sequential chunks.
    ///
    /// A failed chunk aborts the whole write; how much of the payload the
    /// target consumed is then unknown.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(self.max_chunk) {
            trace!("write chunk: {} bytes", chunk.len());
            let written = self.transport.write_chunk(chunk, self.timeout)?;
            if written != chunk.len() {
                return Err(TransportError::ShortWrite.into());
            }
        }
        Ok(())
    }

    /// Read exactly `n` bytes, at most `max_chunk` per transfer.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; n];
        self.read_into(&mut out)?;
        Ok(out)
    }

    /// Fill `buf` completely.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let want = (buf.len() - filled).min(self.max_chunk);
            let got = self
                .transport
                .read_chunk(&mut buf[filled..filled + want], self.timeout)?;
            trace!("read chunk: {got}/{want} bytes");
            filled += got;
        }
        Ok(())
    }

    pub fn write_value<W: Wire>(&mut self, value: &W) -> Result<()> {
        self.write(&value.to_bytes())
    }

    pub fn read_value<W: Wire>(&mut self) -> Result<W> {
        let bytes = self.read(W::SIZE)?;
        W::decode(&bytes)
    }

    /// Read the status word; a nonzero word becomes [`Error::Ipc`].
    pub fn read_result(&mut self) -> Result<()> {
        let mut raw = [0u8; RESULT_SIZE];
        self.read_into(&mut raw)?;
        let rc = ResultCode::from_le_bytes(raw);
        if rc.is_failure() {
            debug!("target returned {rc}");
            return Err(Error::Ipc(rc));
        }
        Ok(())
    }

    // ── Command execution ────────────────────────────────────

    /// Run one command: opcode, input, result, output.
    ///
    /// Returns `Ok(None)` without touching the transport once the channel
    /// has been closed by `Exit`. On a nonzero result no output bytes are
    /// read.
    pub fn execute<C: Command>(&mut self, cmd: &C) -> Result<Option<C::Output>> {
        if self.closed {
            debug!("{:?} skipped: channel closed", C::ID);
            return Ok(None);
        }
        cmd.validate()?;

        debug!("execute {:?}", C::ID);
        self.write(&[C::ID as u8])?;
        cmd.send_input(self)?;
        self.read_result()?;
        let out = cmd.recv_output(self)?;

        if C::CLOSES_CHANNEL {
            debug!("channel closed");
            self.closed = true;
        }
        Ok(Some(out))
    }
}
