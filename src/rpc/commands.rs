//! Primitive commands understood by the on-target command loop.
//!
//! Every command is a one-byte opcode, an optional fixed input and an
//! optional fixed output:
//!
//! ```text
//! host → target:  [opcode u8] [input ...]
//! target → host:  [result u32] [output ...]   (output only when result == 0)
//! ```
//!
//! Each input field group is its own transport write because the target
//! consumes them with separate reads.

use super::channel::Channel;
use super::transport::Transport;
use super::types::ServiceRef;
use super::wire::{Pointer, ServiceName, Shape, Wire, pad};
use crate::error::{Error, Result};

/// One-byte opcode selecting the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    Exit = 0,
    Allocate = 1,
    Free = 2,
    Read = 3,
    Write = 4,
    GetService = 5,
    CloseService = 6,
    ConvertServiceToDomain = 7,
    DispatchToService = 8,
}

/// A command's fixed codec.
pub trait Command {
    const ID: CommandId;
    /// Whether success shuts the channel down.
    const CLOSES_CHANNEL: bool = false;

    type Output;

    /// Reject inputs that cannot be encoded, before anything is sent.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Send everything after the opcode.
    fn send_input<T: Transport>(&self, _channel: &mut Channel<T>) -> Result<()> {
        Ok(())
    }

    /// Read the output that follows a zero result.
    fn recv_output<T: Transport>(&self, channel: &mut Channel<T>) -> Result<Self::Output>;
}

// ── Exit ─────────────────────────────────────────────────────

/// Stop the target's command loop.
#[derive(Debug, Clone, Copy)]
pub struct Exit;

impl Command for Exit {
    const ID: CommandId = CommandId::Exit;
    const CLOSES_CHANNEL: bool = true;
    type Output = ();

    fn recv_output<T: Transport>(&self, _channel: &mut Channel<T>) -> Result<()> {
        Ok(())
    }
}

// ── Allocate / Free ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AllocKind {
    Malloc = 0,
    Calloc = 1,
    Memalign = 2,
}

/// Allocate target memory.
#[derive(Debug, Clone, Copy)]
pub struct Allocate {
    pub kind: AllocKind,
    pub size: u64,
    /// Only sent, and required, for [`AllocKind::Memalign`].
    pub align: Option<u64>,
}

impl Allocate {
    pub fn malloc(size: u64) -> Self {
        Self {
            kind: AllocKind::Malloc,
            size,
            align: None,
        }
    }

    pub fn calloc(size: u64) -> Self {
        Self {
            kind: AllocKind::Calloc,
            size,
            align: None,
        }
    }

    pub fn memalign(size: u64, align: u64) -> Self {
        Self {
            kind: AllocKind::Memalign,
            size,
            align: Some(align),
        }
    }
}

impl Command for Allocate {
    const ID: CommandId = CommandId::Allocate;
    type Output = Pointer;

    fn validate(&self) -> Result<()> {
        match (self.kind, self.align) {
            (AllocKind::Memalign, None) => {
                Err(Error::ProtocolViolation("memalign requires an alignment"))
            }
            (AllocKind::Malloc | AllocKind::Calloc, Some(_)) => {
                Err(Error::ProtocolViolation("alignment only applies to memalign"))
            }
            _ => Ok(()),
        }
    }

    fn send_input<T: Transport>(&self, channel: &mut Channel<T>) -> Result<()> {
        // { u8 kind; u64 size; }
        let mut info = Vec::with_capacity(16);
        info.push(self.kind as u8);
        pad(&mut info, 7);
        self.size.encode(&mut info);
        channel.write(&info)?;

        if let Some(align) = self.align {
            channel.write_value(&align)?;
        }
        Ok(())
    }

    fn recv_output<T: Transport>(&self, channel: &mut Channel<T>) -> Result<Pointer> {
        channel.read_value()
    }
}

/// Release memory obtained from [`Allocate`].
#[derive(Debug, Clone, Copy)]
pub struct Free {
    pub ptr: Pointer,
}

impl Command for Free {
    const ID: CommandId = CommandId::Free;
    type Output = ();

    fn send_input<T: Transport>(&self, channel: &mut Channel<T>) -> Result<()> {
        channel.write_value(&self.ptr)
    }

    fn recv_output<T: Transport>(&self, _channel: &mut Channel<T>) -> Result<()> {
        Ok(())
    }
}

// ── Raw memory access ────────────────────────────────────────

/// `{ void *ptr; u64 size; }`
fn encode_region(ptr: Pointer, size: u64) -> Vec<u8> {
    let mut info = Vec::with_capacity(16);
    ptr.encode(&mut info);
    size.encode(&mut info);
    info
}

/// Copy `size` bytes out of target memory.
#[derive(Debug, Clone, Copy)]
pub struct ReadMemory {
    pub ptr: Pointer,
    pub size: u64,
}

impl ReadMemory {
    pub fn new(ptr: Pointer, size: u64) -> Self {
        Self { ptr, size }
    }

    /// Size taken from an expected value's encoded shape.
    pub fn shaped(ptr: Pointer, shape: Shape) -> Self {
        Self {
            ptr,
            size: shape.size() as u64,
        }
    }
}

impl Command for ReadMemory {
    const ID: CommandId = CommandId::Read;
    type Output = Vec<u8>;

    fn validate(&self) -> Result<()> {
        usize::try_from(self.size)
            .map(|_| ())
            .map_err(|_| Error::ProtocolViolation("read size exceeds host address space"))
    }

    fn send_input<T: Transport>(&self, channel: &mut Channel<T>) -> Result<()> {
        channel.write(&encode_region(self.ptr, self.size))
    }

    fn recv_output<T: Transport>(&self, channel: &mut Channel<T>) -> Result<Vec<u8>> {
        channel.read(self.size as usize)
    }
}

/// Copy bytes into target memory.
#[derive(Debug, Clone, Copy)]
pub struct WriteMemory<'a> {
    pub ptr: Pointer,
    pub data: &'a [u8],
}

impl Command for WriteMemory<'_> {
    const ID: CommandId = CommandId::Write;
    type Output = ();

    fn send_input<T: Transport>(&self, channel: &mut Channel<T>) -> Result<()> {
        channel.write(&encode_region(self.ptr, self.data.len() as u64))?;
        channel.write(self.data)
    }

    fn recv_output<T: Transport>(&self, _channel: &mut Channel<T>) -> Result<()> {
        Ok(())
    }
}

// ── Service manager ──────────────────────────────────────────

/// Look up a service by name.
#[derive(Debug, Clone)]
pub struct GetService {
    pub name: ServiceName,
}

impl Command for GetService {
    const ID: CommandId = CommandId::GetService;
    type Output = ServiceRef;

    fn send_input<T: Transport>(&self, channel: &mut Channel<T>) -> Result<()> {
        channel.write_value(&self.name)
    }

    fn recv_output<T: Transport>(&self, channel: &mut Channel<T>) -> Result<ServiceRef> {
        channel.read_value()
    }
}

/// Close a session or domain object.
#[derive(Debug, Clone, Copy)]
pub struct CloseService {
    pub service: ServiceRef,
}

impl Command for CloseService {
    const ID: CommandId = CommandId::CloseService;
    type Output = ();

    fn send_input<T: Transport>(&self, channel: &mut Channel<T>) -> Result<()> {
        channel.write_value(&self.service)
    }

    fn recv_output<T: Transport>(&self, _channel: &mut Channel<T>) -> Result<()> {
        Ok(())
    }
}

/// Turn a plain session into a domain.
#[derive(Debug, Clone, Copy)]
pub struct ConvertServiceToDomain {
    pub service: ServiceRef,
}

impl Command for ConvertServiceToDomain {
    const ID: CommandId = CommandId::ConvertServiceToDomain;
    type Output = ServiceRef;

    fn send_input<T: Transport>(&self, channel: &mut Channel<T>) -> Result<()> {
        channel.write_value(&self.service)
    }

    fn recv_output<T: Transport>(&self, channel: &mut Channel<T>) -> Result<ServiceRef> {
        channel.read_value()
    }
}
