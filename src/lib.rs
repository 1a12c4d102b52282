//! nxipc: host-side client for a Horizon IPC bridge running on a USB target.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  services (typed stubs: set:sys, fsp-srv)                    │
//! │  ──────────────────────────────────────────────────────────  │
//! │  session   Client · Service · Reply   (lifetime, liveness)   │
//! │  ──────────────────────────────────────────────────────────  │
//! │  rpc       Channel · Commands · Dispatch · Result codec      │
//! │  ──────────────────────────────────────────────────────────  │
//! │  Transport trait  ◀── UsbTransport (rusb) / MockTransport    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The target runs a single command loop; every request is answered by a
//! result word before the next one is sent.

#![deny(unused_must_use)]

pub mod config;
pub mod error;
pub mod rpc;
pub mod services;
pub mod session;
pub mod util;

pub use config::ChannelConfig;
pub use error::{Error, Result, TransportError};
pub use rpc::channel::Channel;
pub use rpc::commands::AllocKind;
pub use rpc::dispatch::{BufferEntry, BufferKind, DispatchRequest, DispatchResult, InValue};
pub use rpc::result::ResultCode;
pub use rpc::transport::{MockTransport, Transport};
pub use rpc::types::{BufferAttr, Handle, OutHandleAttr, ServiceRef, Version};
pub use rpc::wire::{Pointer, Shape, Wire};
pub use session::{Client, Reply, Service};
