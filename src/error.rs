//! Unified error types for the nxipc client.
//!
//! A single `Error` enum that every layer converts into, so a stub built on
//! top of [`Service::dispatch`](crate::session::Service::dispatch) only has
//! one type to match on. Nothing in this crate retries; every variant
//! surfaces directly to the caller.

use core::fmt;

use crate::rpc::result::ResultCode;
use crate::rpc::types::Version;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the client funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No USB device matched the configured vendor/product pair, or it
    /// exposed no usable bulk endpoints.
    DeviceNotFound,
    /// The byte channel failed or a chunk exceeded its deadline.
    Transport(TransportError),
    /// The target answered with a nonzero result word.
    Ipc(ResultCode),
    /// Caller-supplied counts or sizes cannot be expressed on the wire.
    ProtocolViolation(&'static str),
    /// The channel was shut down with `Exit`; no value can be produced.
    ChannelClosed,
    /// The channel is already borrowed by an in-flight command.
    ChannelBusy,
    /// The command needs a newer target firmware than the service was
    /// constructed with.
    Unsupported { required: Version, actual: Version },
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl Error {
    /// The target's result word, if this is an IPC failure.
    pub fn result(&self) -> Option<ResultCode> {
        match self {
            Self::Ipc(rc) => Some(*rc),
            _ => None,
        }
    }

    /// Whether the failure was a transport deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Timeout))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotFound => write!(f, "no matching USB device"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Ipc(rc) => write!(f, "ipc: {rc}"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Self::ChannelClosed => write!(f, "channel closed by exit"),
            Self::ChannelBusy => write!(f, "channel already in use"),
            Self::Unsupported { required, actual } => {
                write!(f, "requires firmware {required}, target is {actual}")
            }
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// A chunk did not complete within the configured timeout.
    Timeout,
    /// The device went away.
    Disconnected,
    /// The endpoint stalled.
    Stall,
    /// Fewer bytes were accepted than were offered.
    ShortWrite,
    /// Any other I/O failure.
    Io,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Disconnected => write!(f, "device disconnected"),
            Self::Stall => write!(f, "endpoint stalled"),
            Self::ShortWrite => write!(f, "short write"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ResultCode> for Error {
    fn from(rc: ResultCode) -> Self {
        Self::Ipc(rc)
    }
}

/// Lets file handles implement `std::io` traits.
impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        let kind = match e {
            Error::Transport(TransportError::Timeout) => std::io::ErrorKind::TimedOut,
            Error::Transport(TransportError::Disconnected) => std::io::ErrorKind::NotConnected,
            Error::ProtocolViolation(_) => std::io::ErrorKind::InvalidInput,
            Error::Unsupported { .. } => std::io::ErrorKind::Unsupported,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
