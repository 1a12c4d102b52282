//! Service/session model.
//!
//! ```text
//!   Client ──(GetService [+ ConvertServiceToDomain])──▶ Service
//!   Service ──dispatch──▶ Reply { out, buffers, objects: [Service, ..] }
//!                                                  │
//!                          derived: liveness chained to the dispatcher
//! ```
//!
//! A [`Client`] is a cheap handle to one exclusively owned [`Channel`]. It
//! is neither `Send` nor `Sync`: the channel belongs to one thread.
//!
//! ## Closing
//!
//! [`Service::close`] is idempotent and one-way. A derived service (an
//! object returned by a dispatch) is already released when any ancestor
//! is closed, so closing it afterwards sends nothing.
//!
//! Release should be explicit: call `close`, or use [`Service::scope`] /
//! [`Client::with_service`], which close on every exit path. `Drop` also
//! closes as a backstop, but drop order between sibling and parent handles
//! is easy to get wrong and a failure there can only be logged, so do not
//! rely on it for ordering.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::rpc::channel::Channel;
use crate::rpc::commands::{
    AllocKind, Allocate, CloseService, Command, ConvertServiceToDomain, Exit, Free, GetService,
    ReadMemory, WriteMemory,
};
use crate::rpc::dispatch::{DispatchRequest, DispatchResult};
use crate::rpc::transport::Transport;
use crate::rpc::types::{ServiceRef, Version};
use crate::rpc::wire::{Pointer, ServiceName, Wire};

// ── Client ───────────────────────────────────────────────────

/// Shared handle to one channel.
pub struct Client<T: Transport> {
    channel: Rc<RefCell<Channel<T>>>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            channel: Rc::clone(&self.channel),
        }
    }
}

#[cfg(feature = "usb")]
impl Client<crate::rpc::usb::UsbTransport> {
    /// Open the USB device described by `config`.
    pub fn connect(config: &crate::config::ChannelConfig) -> Result<Self> {
        let transport = crate::rpc::usb::UsbTransport::open(config)?;
        Ok(Self::new(Channel::new(transport, config)?))
    }
}

impl<T: Transport> Client<T> {
    pub fn new(channel: Channel<T>) -> Self {
        Self {
            channel: Rc::new(RefCell::new(channel)),
        }
    }

    /// Borrow the channel for the duration of `f`.
    pub fn with_channel<R>(&self, f: impl FnOnce(&mut Channel<T>) -> Result<R>) -> Result<R> {
        let mut channel = self
            .channel
            .try_borrow_mut()
            .map_err(|_| Error::ChannelBusy)?;
        f(&mut channel)
    }

    /// Whether `Exit` has shut the channel down.
    pub fn is_closed(&self) -> bool {
        self.channel.try_borrow().is_ok_and(|c| c.is_closed())
    }

    /// Execute a command; `Ok(None)` once the channel is closed.
    pub fn execute<C: Command>(&self, cmd: &C) -> Result<Option<C::Output>> {
        self.with_channel(|ch| ch.execute(cmd))
    }

    /// Execute a command whose value the caller needs.
    fn execute_value<C: Command>(&self, cmd: &C) -> Result<C::Output> {
        self.execute(cmd)?.ok_or(Error::ChannelClosed)
    }

    // ── Service manager ──────────────────────────────────────

    pub fn get_service(&self, name: &str) -> Result<ServiceRef> {
        let name = ServiceName::new(name)?;
        self.execute_value(&GetService { name })
    }

    pub fn convert_to_domain(&self, service: ServiceRef) -> Result<ServiceRef> {
        self.execute_value(&ConvertServiceToDomain { service })
    }

    /// Close a raw reference. No-op when it is already inactive.
    pub fn close(&self, service: &mut ServiceRef) -> Result<()> {
        if !service.is_active() {
            return Ok(());
        }
        self.execute(&CloseService { service: *service })?;
        service.deactivate();
        Ok(())
    }

    /// Look up `name`, converting it to a domain when `domain` is set.
    pub fn open_service(&self, name: &str, domain: bool, version: Version) -> Result<Service<T>> {
        let mut reference = self.get_service(name)?;
        if domain {
            match self.convert_to_domain(reference) {
                Ok(converted) => reference = converted,
                Err(e) => {
                    if let Err(close_err) = self.close(&mut reference) {
                        warn!("{name}: close after failed domain conversion: {close_err}");
                    }
                    return Err(e);
                }
            }
        }
        info!("opened {name} (session {:#x}, domain={domain})", reference.session);
        Ok(Service::root(self.clone(), reference, version))
    }

    /// Open a service, run `f`, and close the service on every path.
    pub fn with_service<R>(
        &self,
        name: &str,
        domain: bool,
        version: Version,
        f: impl FnOnce(&mut Service<T>) -> Result<R>,
    ) -> Result<R> {
        self.open_service(name, domain, version)?.scope(f)
    }

    // ── Dispatch ─────────────────────────────────────────────

    pub fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchResult> {
        self.execute_value(request)
    }

    // ── Target memory ────────────────────────────────────────

    pub fn allocate(&self, kind: AllocKind, size: u64, align: Option<u64>) -> Result<Pointer> {
        self.execute_value(&Allocate { kind, size, align })
    }

    pub fn free(&self, ptr: Pointer) -> Result<()> {
        self.execute(&Free { ptr }).map(|_| ())
    }

    pub fn raw_read(&self, ptr: Pointer, size: u64) -> Result<Vec<u8>> {
        self.execute_value(&ReadMemory::new(ptr, size))
    }

    /// Read a value of `W`'s encoded size and decode it.
    pub fn read_value<W: Wire>(&self, ptr: Pointer) -> Result<W> {
        let bytes = self.execute_value(&ReadMemory::new(ptr, W::SIZE as u64))?;
        W::decode(&bytes)
    }

    pub fn raw_write(&self, ptr: Pointer, data: &[u8]) -> Result<()> {
        self.execute(&WriteMemory { ptr, data }).map(|_| ())
    }

    pub fn write_value<W: Wire>(&self, ptr: Pointer, value: &W) -> Result<()> {
        self.raw_write(ptr, &value.to_bytes())
    }

    /// Stop the target's command loop. Later commands become no-ops.
    pub fn exit(&self) -> Result<()> {
        self.execute(&Exit).map(|_| ())
    }
}

// ── Liveness ─────────────────────────────────────────────────

/// Open/closed state shared between a service and the objects it returned.
#[derive(Debug)]
struct Liveness {
    alive: Cell<bool>,
    parent: Option<Rc<Liveness>>,
}

impl Liveness {
    fn root() -> Rc<Self> {
        Rc::new(Self {
            alive: Cell::new(true),
            parent: None,
        })
    }

    fn child(parent: &Rc<Self>) -> Rc<Self> {
        Rc::new(Self {
            alive: Cell::new(true),
            parent: Some(Rc::clone(parent)),
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.get() && self.parent.as_ref().is_none_or(|p| p.is_alive())
    }
}

// ── Service ──────────────────────────────────────────────────

/// An open remote session or domain object.
pub struct Service<T: Transport> {
    client: Client<T>,
    reference: ServiceRef,
    version: Version,
    liveness: Rc<Liveness>,
}

impl<T: Transport> Service<T> {
    fn root(client: Client<T>, reference: ServiceRef, version: Version) -> Self {
        Self {
            client,
            reference,
            version,
            liveness: Liveness::root(),
        }
    }

    /// Wrap an object returned by one of this service's dispatches.
    fn derive(&self, reference: ServiceRef) -> Self {
        Self {
            client: self.client.clone(),
            reference,
            version: self.version,
            liveness: Liveness::child(&self.liveness),
        }
    }

    pub fn reference(&self) -> ServiceRef {
        self.reference
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn client(&self) -> &Client<T> {
        &self.client
    }

    /// Whether a dispatch result came from this service's parent chain.
    pub fn is_derived(&self) -> bool {
        self.liveness.parent.is_some()
    }

    /// Closed when its own reference is inactive or any ancestor is closed.
    pub fn is_closed(&self) -> bool {
        !self.reference.is_active() || !self.liveness.is_alive()
    }

    /// Release the remote object. Safe to call any number of times.
    pub fn close(&mut self) -> Result<()> {
        if !self.reference.is_active() {
            return Ok(());
        }
        if !self.liveness.is_alive() {
            // An ancestor's close already released this object.
            debug!(
                "object {} on session {:#x} released with its parent",
                self.reference.object_id, self.reference.session
            );
            self.reference.deactivate();
            return Ok(());
        }
        self.client.close(&mut self.reference)?;
        self.liveness.alive.set(false);
        Ok(())
    }

    /// Run `f`, then close, whichever way `f` exits.
    ///
    /// An error from `f` wins over an error from the close.
    pub fn scope<R>(mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let outcome = f(&mut self);
        let closed = self.close();
        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("close after failed scope: {close_err}");
                }
                Err(e)
            }
        }
    }

    /// Start a request addressed to this service.
    pub fn request(&self, request_id: u32) -> DispatchRequest {
        DispatchRequest::new(self.reference, request_id)
    }

    /// Invoke a method. Returned objects become derived services.
    pub fn dispatch(&self, request: DispatchRequest) -> Result<Reply<T>> {
        if self.is_closed() {
            return Err(Error::ProtocolViolation("dispatch on a closed service"));
        }
        if request.service != self.reference {
            return Err(Error::ProtocolViolation("request addressed to another service"));
        }
        let mut data = self.client.dispatch(&request)?;
        let objects = core::mem::take(&mut data.objects)
            .into_iter()
            .map(|reference| self.derive(reference))
            .collect();
        Ok(Reply { data, objects })
    }

    /// Shorthand for `dispatch(request(id))`.
    pub fn call(&self, request_id: u32) -> Result<Reply<T>> {
        self.dispatch(self.request(request_id))
    }

    pub fn allocate(&self, kind: AllocKind, size: u64, align: Option<u64>) -> Result<Pointer> {
        self.client.allocate(kind, size, align)
    }

    pub fn free(&self, ptr: Pointer) -> Result<()> {
        self.client.free(ptr)
    }

    pub fn raw_read(&self, ptr: Pointer, size: u64) -> Result<Vec<u8>> {
        self.client.raw_read(ptr, size)
    }

    pub fn raw_write(&self, ptr: Pointer, data: &[u8]) -> Result<()> {
        self.client.raw_write(ptr, data)
    }
}

impl<T: Transport> Drop for Service<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(
                "backstop close of session {:#x} failed: {e}",
                self.reference.session
            );
        }
    }
}

// ── Reply ────────────────────────────────────────────────────

/// Response of [`Service::dispatch`].
pub struct Reply<T: Transport> {
    data: DispatchResult,
    objects: Vec<Service<T>>,
}

impl<T: Transport> Reply<T> {
    /// Raw output, buffers (and no objects; those live in the reply).
    pub fn data(&self) -> &DispatchResult {
        &self.data
    }

    pub fn out<W: Wire>(&self) -> Result<W> {
        self.data.out()
    }

    pub fn buffer(&self, index: usize) -> Result<&[u8]> {
        self.data.buffer(index)
    }

    pub fn buffer_as<W: Wire>(&self, index: usize) -> Result<W> {
        self.data.buffer_as(index)
    }

    pub fn buffer_array<W: Wire>(&self, index: usize) -> Result<Vec<W>> {
        self.data.buffer_array(index)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Take ownership of the returned objects.
    pub fn into_objects(self) -> Vec<Service<T>> {
        self.objects
    }

    /// Take the first returned object.
    pub fn into_object(self) -> Result<Service<T>> {
        self.objects
            .into_iter()
            .next()
            .ok_or(Error::ProtocolViolation("reply carries no object"))
    }
}
