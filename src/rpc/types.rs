//! Protocol value types shared by the command and dispatch layers.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

use super::wire::{Reader, Wire, pad};
use crate::error::Result;

/// A kernel handle value on the target.
pub type Handle = u32;

// ── Service reference ────────────────────────────────────────

/// Identity of a remote session or domain object.
///
/// | shape            | `session` | `own_handle` | `object_id` |
/// |------------------|-----------|--------------|-------------|
/// | inactive         | 0         | –            | –           |
/// | plain session    | ≠0        | 0            | 0           |
/// | domain           | ≠0        | ≠0           | ≠0          |
/// | domain subobject | ≠0        | 0            | ≠0          |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServiceRef {
    pub session: Handle,
    pub own_handle: u32,
    pub object_id: u32,
    pub pointer_buffer_size: u16,
}

impl ServiceRef {
    pub const INACTIVE: Self = Self {
        session: 0,
        own_handle: 0,
        object_id: 0,
        pointer_buffer_size: 0,
    };

    pub const fn is_active(&self) -> bool {
        self.session != 0
    }

    /// A plain, non-domain session.
    pub const fn is_override(&self) -> bool {
        self.is_active() && self.own_handle == 0 && self.object_id == 0
    }

    pub const fn is_domain(&self) -> bool {
        self.is_active() && self.own_handle != 0 && self.object_id != 0
    }

    pub const fn is_domain_subobject(&self) -> bool {
        self.is_active() && self.own_handle == 0 && self.object_id != 0
    }

    /// Mark inactive. One-way: nothing in the crate re-activates a reference.
    pub fn deactivate(&mut self) {
        self.session = 0;
    }
}

impl Wire for ServiceRef {
    const SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        self.session.encode(out);
        self.own_handle.encode(out);
        self.object_id.encode(out);
        self.pointer_buffer_size.encode(out);
        pad(out, 2);
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Self> {
        let session = r.u32()?;
        let own_handle = r.u32()?;
        let object_id = r.u32()?;
        let pointer_buffer_size = r.u16()?;
        r.skip(2)?;
        Ok(Self {
            session,
            own_handle,
            object_id,
            pointer_buffer_size,
        })
    }
}

// ── Buffer attributes ────────────────────────────────────────

/// Direction and transfer-mode flags of a dispatch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferAttr(u32);

impl BufferAttr {
    pub const NONE: Self = Self(0);
    pub const IN: Self = Self(1 << 0);
    pub const OUT: Self = Self(1 << 1);
    pub const HIPC_MAP_ALIAS: Self = Self(1 << 2);
    pub const HIPC_POINTER: Self = Self(1 << 3);
    pub const FIXED_SIZE: Self = Self(1 << 4);
    pub const HIPC_AUTO_SELECT: Self = Self(1 << 5);
    pub const HIPC_MAP_TRANSFER_ALLOWS_NON_SECURE: Self = Self(1 << 6);
    pub const HIPC_MAP_TRANSFER_ALLOWS_NON_DEVICE: Self = Self(1 << 7);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for BufferAttr {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for BufferAttr {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// How an output handle is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutHandleAttr {
    Blank = 0,
    HipcCopy = 1,
    HipcMove = 2,
}

// ── Version ──────────────────────────────────────────────────

/// Target firmware version, used only to pick command ids and layouts.
///
/// Field order makes the derived ordering identical to comparing
/// [`packed`](Self::packed) values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub micro: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, micro: u8) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }

    pub const fn packed(self) -> u32 {
        ((self.major as u32) << 16) | ((self.minor as u32) << 8) | self.micro as u32
    }

    pub const fn from_packed(packed: u32) -> Self {
        Self::new((packed >> 16) as u8, (packed >> 8) as u8, packed as u8)
    }

    /// `Ok` when `self` is at least `required`.
    pub fn require(self, required: Version) -> Result<()> {
        if self >= required {
            Ok(())
        } else {
            Err(crate::error::Error::Unsupported {
                required,
                actual: self,
            })
        }
    }
}

impl From<(u8, u8, u8)> for Version {
    fn from((major, minor, micro): (u8, u8, u8)) -> Self {
        Self::new(major, minor, micro)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}
