//! Dispatch engine: generic remote method invocation (opcode 8).
//!
//! Request, one transport write per row:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ opcode 0x08                                              │
//! │ header (48 B)  service · request_id · in/out size · ...  │
//! │ input payload (in_size B)                   if present   │
//! │ for each buffer:                                          │
//! │   descriptor (16 B)  size u64 · attr u32 · is_pointer u8 │
//! │   pointer (8 B) | payload (size B)  if pointer or In     │
//! │ for each input handle: u32                               │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Response: result word, then (on success only) the output payload, the
//! output object records, and every non-deferred Out buffer in supply
//! order. A nonzero result aborts before anything else is read.

use log::debug;

use super::channel::Channel;
use super::commands::{Command, CommandId};
use super::transport::Transport;
use super::types::{BufferAttr, Handle, ServiceRef};
use super::wire::{Pointer, Reader, Shape, Wire, pad};
use crate::error::{Error, Result};

/// Most buffers the target accepts in one dispatch.
pub const MAX_BUFFERS: usize = 8;
/// Most input handles the target accepts in one dispatch.
pub const MAX_IN_HANDLES: usize = 8;
/// Most input objects the target accepts in one dispatch.
pub const MAX_IN_OBJECTS: usize = 8;
/// Most output objects the target accepts in one dispatch.
pub const MAX_OUT_OBJECTS: usize = 8;

const HEADER_SIZE: usize = 48;

// ── Buffer entries ───────────────────────────────────────────

/// Input value carried by a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InValue {
    /// Encoded bytes, copied inline.
    Bytes(Vec<u8>),
    /// Target memory the far side dereferences in place.
    Pointer(Pointer),
}

impl InValue {
    fn encoded(&self) -> Vec<u8> {
        match self {
            Self::Bytes(bytes) => bytes.clone(),
            Self::Pointer(ptr) => ptr.to_bytes(),
        }
    }

    fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer(_))
    }
}

/// What a buffer carries, chosen explicitly at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferKind {
    /// Out buffer of a given byte size.
    SizedOut(u64),
    /// Out buffer sized to hold a value of some shape.
    TypedOut(Shape),
    /// Raw input bytes.
    RawIn(Vec<u8>),
    /// An encoded structured value (or a pointer) as input.
    StructuredIn(InValue),
    /// Descriptor size given explicitly; the value is sent only if the
    /// caller's attribute asks for it, and nothing is ever read back.
    DeferredSized { value: InValue, size: u64 },
}

/// A scatter-gather buffer: a kind plus caller transfer-mode flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferEntry {
    pub kind: BufferKind,
    pub attr: BufferAttr,
}

/// A buffer entry reduced to what goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBuffer {
    pub size: u64,
    pub attr: BufferAttr,
    pub is_pointer: bool,
    pub deferred: bool,
}

impl ResolvedBuffer {
    /// Whether the payload follows the descriptor on send.
    pub fn sends_payload(&self) -> bool {
        self.is_pointer || self.attr.contains(BufferAttr::IN)
    }

    /// Whether the payload comes back after a successful result.
    pub fn reads_back(&self) -> bool {
        !self.deferred && self.attr.contains(BufferAttr::OUT)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        self.size.encode(out);
        self.attr.bits().encode(out);
        out.push(u8::from(self.is_pointer));
        pad(out, 3);
    }
}

impl BufferEntry {
    pub fn sized_out(size: u64, attr: BufferAttr) -> Self {
        Self {
            kind: BufferKind::SizedOut(size),
            attr,
        }
    }

    pub fn typed_out<T: Wire>(attr: BufferAttr) -> Self {
        Self::shaped_out(Shape::of::<T>(), attr)
    }

    pub fn array_out<T: Wire>(count: usize, attr: BufferAttr) -> Self {
        Self::shaped_out(Shape::array_of::<T>(count), attr)
    }

    pub fn shaped_out(shape: Shape, attr: BufferAttr) -> Self {
        Self {
            kind: BufferKind::TypedOut(shape),
            attr,
        }
    }

    pub fn raw_in(bytes: impl Into<Vec<u8>>, attr: BufferAttr) -> Self {
        Self {
            kind: BufferKind::RawIn(bytes.into()),
            attr,
        }
    }

    pub fn structured_in<T: Wire>(value: &T, attr: BufferAttr) -> Self {
        Self {
            kind: BufferKind::StructuredIn(InValue::Bytes(value.to_bytes())),
            attr,
        }
    }

    /// A bare pointer: the target uses that memory in place.
    pub fn pointer_in(ptr: Pointer, attr: BufferAttr) -> Self {
        Self {
            kind: BufferKind::StructuredIn(InValue::Pointer(ptr)),
            attr,
        }
    }

    pub fn deferred(value: InValue, size: u64, attr: BufferAttr) -> Self {
        Self {
            kind: BufferKind::DeferredSized { value, size },
            attr,
        }
    }

    /// Target memory of `size` bytes used in place, never read back.
    pub fn deferred_pointer(ptr: Pointer, size: u64, attr: BufferAttr) -> Self {
        Self::deferred(InValue::Pointer(ptr), size, attr)
    }

    /// Descriptor size, effective attribute and pointer/deferred marks.
    pub fn resolve(&self) -> ResolvedBuffer {
        let (size, attr, is_pointer, deferred) = match &self.kind {
            BufferKind::SizedOut(size) => (*size, self.attr | BufferAttr::OUT, false, false),
            BufferKind::TypedOut(shape) => {
                (shape.size() as u64, self.attr | BufferAttr::OUT, false, false)
            }
            BufferKind::RawIn(bytes) => {
                (bytes.len() as u64, self.attr | BufferAttr::IN, false, false)
            }
            BufferKind::StructuredIn(value) => (
                value.encoded().len() as u64,
                self.attr | BufferAttr::IN,
                value.is_pointer(),
                false,
            ),
            BufferKind::DeferredSized { value, size } => {
                (*size, self.attr, value.is_pointer(), true)
            }
        };
        ResolvedBuffer {
            size,
            attr,
            is_pointer,
            deferred,
        }
    }

    /// A deferred inline value the target would read `size` bytes of.
    fn inline_size_mismatch(&self) -> bool {
        let BufferKind::DeferredSized { value, size } = &self.kind else {
            return false;
        };
        let resolved = self.resolve();
        !resolved.is_pointer && resolved.sends_payload() && value.encoded().len() as u64 != *size
    }

    /// Bytes that follow the descriptor when it sends a payload.
    fn payload(&self) -> Vec<u8> {
        match &self.kind {
            BufferKind::SizedOut(size) => vec![0; *size as usize],
            BufferKind::TypedOut(shape) => vec![0; shape.size()],
            BufferKind::RawIn(bytes) => bytes.clone(),
            BufferKind::StructuredIn(value) | BufferKind::DeferredSized { value, .. } => {
                value.encoded()
            }
        }
    }
}

// ── Request ──────────────────────────────────────────────────

/// Everything needed to invoke one remote method.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub service: ServiceRef,
    pub request_id: u32,
    pub input: Option<Vec<u8>>,
    pub output: Option<Shape>,
    pub buffers: Vec<BufferEntry>,
    /// Counted in the header only; the target does not read them.
    pub in_objects: Vec<ServiceRef>,
    pub in_handles: Vec<Handle>,
    pub out_objects: u32,
    /// Counted in the header only; the target does not send them.
    pub out_handles: u8,
    pub send_pid: bool,
    /// 0 uses the service's own session.
    pub target_session: Handle,
    pub context: u32,
}

impl DispatchRequest {
    pub fn new(service: ServiceRef, request_id: u32) -> Self {
        Self {
            service,
            request_id,
            input: None,
            output: None,
            buffers: Vec::new(),
            in_objects: Vec::new(),
            in_handles: Vec::new(),
            out_objects: 0,
            out_handles: 0,
            send_pid: false,
            target_session: 0,
            context: 0,
        }
    }

    #[must_use]
    pub fn input<T: Wire>(mut self, value: &T) -> Self {
        self.input = Some(value.to_bytes());
        self
    }

    #[must_use]
    pub fn input_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.input = Some(bytes.into());
        self
    }

    #[must_use]
    pub fn output<T: Wire>(self) -> Self {
        self.output_shape(Shape::of::<T>())
    }

    #[must_use]
    pub fn output_shape(mut self, shape: Shape) -> Self {
        self.output = Some(shape);
        self
    }

    #[must_use]
    pub fn buffer(mut self, entry: BufferEntry) -> Self {
        self.buffers.push(entry);
        self
    }

    #[must_use]
    pub fn in_object(mut self, object: ServiceRef) -> Self {
        self.in_objects.push(object);
        self
    }

    #[must_use]
    pub fn in_handle(mut self, handle: Handle) -> Self {
        self.in_handles.push(handle);
        self
    }

    #[must_use]
    pub fn out_objects(mut self, count: u32) -> Self {
        self.out_objects = count;
        self
    }

    #[must_use]
    pub fn out_handles(mut self, count: u8) -> Self {
        self.out_handles = count;
        self
    }

    #[must_use]
    pub fn send_pid(mut self) -> Self {
        self.send_pid = true;
        self
    }

    #[must_use]
    pub fn target_session(mut self, session: Handle) -> Self {
        self.target_session = session;
        self
    }

    #[must_use]
    pub fn context(mut self, context: u32) -> Self {
        self.context = context;
        self
    }

    fn in_size(&self) -> usize {
        self.input.as_ref().map_or(0, Vec::len)
    }

    fn out_size(&self) -> usize {
        self.output.map_or(0, Shape::size)
    }

    fn encode_header(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        self.service.encode(&mut out);
        self.request_id.encode(&mut out);
        (self.in_size() as u32).encode(&mut out);
        (self.out_size() as u32).encode(&mut out);
        self.target_session.encode(&mut out);
        self.context.encode(&mut out);
        out.push(self.buffers.len() as u8);
        out.push(u8::from(self.send_pid));
        out.push(self.in_objects.len() as u8);
        out.push(self.in_handles.len() as u8);
        self.out_objects.encode(&mut out);
        out.push(self.out_handles);
        pad(&mut out, 3);
        debug_assert_eq!(out.len(), HEADER_SIZE);
        out
    }
}

impl Command for DispatchRequest {
    const ID: CommandId = CommandId::DispatchToService;
    type Output = DispatchResult;

    fn validate(&self) -> Result<()> {
        if self.buffers.len() > MAX_BUFFERS {
            return Err(Error::ProtocolViolation("more than 8 buffers"));
        }
        if self.in_handles.len() > MAX_IN_HANDLES {
            return Err(Error::ProtocolViolation("more than 8 input handles"));
        }
        if self.in_objects.len() > MAX_IN_OBJECTS {
            return Err(Error::ProtocolViolation("more than 8 input objects"));
        }
        if self.out_objects as usize > MAX_OUT_OBJECTS {
            return Err(Error::ProtocolViolation("more than 8 output objects"));
        }
        if u32::try_from(self.in_size()).is_err() || u32::try_from(self.out_size()).is_err() {
            return Err(Error::ProtocolViolation("raw data exceeds 32-bit size field"));
        }
        if self
            .buffers
            .iter()
            .any(|entry| usize::try_from(entry.resolve().size).is_err())
        {
            return Err(Error::ProtocolViolation("buffer size exceeds host address space"));
        }
        if self.buffers.iter().any(BufferEntry::inline_size_mismatch) {
            return Err(Error::ProtocolViolation(
                "deferred inline payload does not match its declared size",
            ));
        }
        Ok(())
    }

    fn send_input<T: Transport>(&self, channel: &mut Channel<T>) -> Result<()> {
        debug!(
            "dispatch request {} to session {:#x} ({} buffers, {} out objects)",
            self.request_id,
            self.service.session,
            self.buffers.len(),
            self.out_objects
        );
        channel.write(&self.encode_header())?;
        if let Some(input) = &self.input {
            channel.write(input)?;
        }

        for entry in &self.buffers {
            let resolved = entry.resolve();
            let mut descriptor = Vec::with_capacity(16);
            resolved.encode(&mut descriptor);
            channel.write(&descriptor)?;

            if resolved.sends_payload() {
                channel.write(&entry.payload())?;
            }
        }

        for handle in &self.in_handles {
            channel.write_value(handle)?;
        }
        Ok(())
    }

    fn recv_output<T: Transport>(&self, channel: &mut Channel<T>) -> Result<DispatchResult> {
        let out = match self.output {
            Some(shape) => Some(channel.read(shape.size())?),
            None => None,
        };

        let objects = if self.out_objects > 0 {
            let raw = channel.read(self.out_objects as usize * ServiceRef::SIZE)?;
            ServiceRef::decode_array(&raw)?
        } else {
            Vec::new()
        };

        let mut buffers = Vec::new();
        for entry in &self.buffers {
            let resolved = entry.resolve();
            if resolved.reads_back() {
                buffers.push(channel.read(resolved.size as usize)?);
            }
        }

        Ok(DispatchResult {
            out,
            objects,
            buffers,
        })
    }
}

// ── Result ───────────────────────────────────────────────────

/// Decoded response of a successful dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchResult {
    /// Raw output payload, when an output shape was declared.
    pub out: Option<Vec<u8>>,
    /// Returned object references, in order.
    pub objects: Vec<ServiceRef>,
    /// Returned Out buffers in supply order, deferred entries omitted.
    pub buffers: Vec<Vec<u8>>,
}

impl DispatchResult {
    /// Decode the output payload as `T`.
    pub fn out<T: Wire>(&self) -> Result<T> {
        let bytes = self
            .out
            .as_deref()
            .ok_or(Error::ProtocolViolation("no output shape was requested"))?;
        T::decode(bytes)
    }

    /// Decode the leading `T` of the output payload, ignoring the rest.
    pub fn out_prefix<T: Wire>(&self) -> Result<T> {
        let bytes = self
            .out
            .as_deref()
            .ok_or(Error::ProtocolViolation("no output shape was requested"))?;
        T::read_from(&mut Reader::new(bytes))
    }

    pub fn buffer(&self, index: usize) -> Result<&[u8]> {
        self.buffers
            .get(index)
            .map(Vec::as_slice)
            .ok_or(Error::ProtocolViolation("no such output buffer"))
    }

    /// Decode output buffer `index` as a single `T`.
    pub fn buffer_as<T: Wire>(&self, index: usize) -> Result<T> {
        T::decode(self.buffer(index)?)
    }

    /// Decode output buffer `index` as consecutive `T`s.
    pub fn buffer_array<T: Wire>(&self, index: usize) -> Result<Vec<T>> {
        T::decode_array(self.buffer(index)?)
    }
}
