//! Result codec: the target's 32-bit status word.
//!
//! ```text
//!  31        22 21                 9 8          0
//! ┌────────────┬────────────────────┬────────────┐
//! │  reserved  │ description (13 b) │ module (9b)│
//! └────────────┴────────────────────┴────────────┘
//! ```
//!
//! Zero is success. Every command reads one of these immediately after its
//! request has been sent.

use core::fmt;

/// Size of a result word on the wire.
pub const RESULT_SIZE: usize = 4;

/// Module number used by the on-target command loop for its own failures.
pub const NXIPC_MODULE: u32 = 396;

/// A raw status word. Equality is defined on the whole word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResultCode(u32);

impl ResultCode {
    pub const SUCCESS: Self = Self(0);

    /// `GetService` named a service the service manager does not know.
    pub const SERVICE_NOT_REGISTERED: Self = Self::new(NXIPC_MODULE, 1);
    /// The opcode byte was not recognised.
    pub const INVALID_COMMAND: Self = Self::new(NXIPC_MODULE, 2);
    /// `Allocate` carried an unknown kind byte.
    pub const INVALID_ALLOCATION_KIND: Self = Self::new(NXIPC_MODULE, 3);
    /// The target's allocator returned null.
    pub const OUT_OF_MEMORY: Self = Self::new(NXIPC_MODULE, 4);

    /// Compose a word from its module and description fields.
    pub const fn new(module: u32, description: u32) -> Self {
        Self((module & 0x1FF) | ((description & 0x1FFF) << 9))
    }

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Decode exactly four little-endian bytes.
    pub fn from_le_bytes(bytes: [u8; RESULT_SIZE]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    pub const fn is_failure(self) -> bool {
        !self.is_success()
    }

    pub const fn module(self) -> u32 {
        self.0 & 0x1FF
    }

    pub const fn description(self) -> u32 {
        (self.0 >> 9) & 0x1FFF
    }
}

impl PartialEq<u32> for ResultCode {
    fn eq(&self, other: &u32) -> bool {
        self.0 == *other
    }
}

impl From<u32> for ResultCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "2{:03}-{:04} ({:#x})",
            self.module(),
            self.description(),
            self.0
        )
    }
}
