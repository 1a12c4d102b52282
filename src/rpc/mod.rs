//! Host side of the USB IPC bridge.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Client Stack                          │
//! │                                                            │
//! │  ┌───────────┐   ┌───────────┐   ┌──────────────────────┐  │
//! │  │ Transport │──▶│  Channel  │──▶│ Commands / Dispatch  │  │
//! │  │ (trait)   │   │ (chunking)│   │ (fixed wire codecs)  │  │
//! │  └───────────┘   └───────────┘   └──────────────────────┘  │
//! │        ▲               │                                   │
//! │        │               ▼                                   │
//! │  ┌───────────┐   ┌───────────┐                             │
//! │  │ USB bulk  │   │  Result   │   (status word after every  │
//! │  │ endpoints │   │  codec    │    request)                 │
//! │  └───────────┘   └───────────┘                             │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! One request is in flight at a time: the wire carries no correlation id.

pub mod channel;
pub mod commands;
pub mod dispatch;
pub mod result;
pub mod transport;
pub mod types;
#[cfg(feature = "usb")]
pub mod usb;
pub mod wire;
