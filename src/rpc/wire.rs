//! Fixed-layout wire encoding.
//!
//! Every structure the target reads or writes is a C struct with natural
//! alignment, little-endian. [`Wire`] is the contract for such a value:
//! a compile-time encoded size plus explicit encode/decode. Padding is
//! written as zero and skipped on read.

use crate::error::{Error, Result};

/// A value with a fixed little-endian C layout.
pub trait Wire: Sized {
    /// Encoded size in bytes, including trailing padding.
    const SIZE: usize;

    /// Append exactly [`SIZE`](Self::SIZE) bytes to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Decode from a reader positioned at the start of the value.
    fn read_from(r: &mut Reader<'_>) -> Result<Self>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.encode(&mut out);
        out
    }

    /// Decode a value that must occupy exactly `bytes`.
    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(Error::ProtocolViolation("decoded size does not match shape"));
        }
        Self::read_from(&mut Reader::new(bytes))
    }

    /// Decode `bytes.len() / SIZE` consecutive values.
    fn decode_array(bytes: &[u8]) -> Result<Vec<Self>> {
        if Self::SIZE == 0 || bytes.len() % Self::SIZE != 0 {
            return Err(Error::ProtocolViolation("buffer is not a whole number of elements"));
        }
        let mut r = Reader::new(bytes);
        (0..bytes.len() / Self::SIZE).map(|_| Self::read_from(&mut r)).collect()
    }
}

/// Append `n` zero bytes.
pub fn pad(out: &mut Vec<u8>, n: usize) {
    out.resize(out.len() + n, 0);
}

// ── Reader ───────────────────────────────────────────────────

/// Bounds-checked little-endian cursor.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::ProtocolViolation("short read while decoding"));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(self.u64()? as i64)
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }
}

// ── Primitive impls ──────────────────────────────────────────

macro_rules! wire_int {
    ($($ty:ty),*) => {$(
        impl Wire for $ty {
            const SIZE: usize = core::mem::size_of::<$ty>();

            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_from(r: &mut Reader<'_>) -> Result<Self> {
                Ok(<$ty>::from_le_bytes(r.array()?))
            }
        }
    )*};
}

wire_int!(u8, u16, u32, u64, i8, i16, i32, i64);

impl Wire for bool {
    const SIZE: usize = 1;

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Self> {
        r.bool()
    }
}

impl<const N: usize> Wire for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Self> {
        r.array()
    }
}

// ── Pointer ──────────────────────────────────────────────────

/// An address in the target's memory.
///
/// As a buffer value it tells the target to use the memory in place
/// instead of staging a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Pointer(pub u64);

impl Pointer {
    pub const NULL: Self = Self(0);

    pub const fn addr(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn offset(self, by: u64) -> Self {
        Self(self.0.wrapping_add(by))
    }
}

impl core::fmt::Display for Pointer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Wire for Pointer {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out);
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self(r.u64()?))
    }
}

// ── Shape ────────────────────────────────────────────────────

/// The byte size of an expected output value, chosen at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    size: usize,
}

impl Shape {
    pub const fn bytes(size: usize) -> Self {
        Self { size }
    }

    pub const fn of<T: Wire>() -> Self {
        Self { size: T::SIZE }
    }

    pub const fn array_of<T: Wire>(count: usize) -> Self {
        Self {
            size: T::SIZE * count,
        }
    }

    pub const fn size(self) -> usize {
        self.size
    }
}

// ── Service name ─────────────────────────────────────────────

/// Length of a service-manager name on the wire.
pub const SERVICE_NAME_LEN: usize = 8;

/// A service-manager name: up to 8 ASCII bytes, zero padded on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceName(heapless::String<SERVICE_NAME_LEN>);

impl ServiceName {
    pub fn new(name: &str) -> Result<Self> {
        if !name.is_ascii() || name.contains('\0') {
            return Err(Error::ProtocolViolation("service name must be ASCII without NUL"));
        }
        let mut s = heapless::String::new();
        s.push_str(name)
            .map_err(|()| Error::ProtocolViolation("service name longer than 8 bytes"))?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Wire for ServiceName {
    const SIZE: usize = SERVICE_NAME_LEN;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.0.as_bytes());
        pad(out, SERVICE_NAME_LEN - self.0.len());
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Self> {
        let raw = r.bytes(SERVICE_NAME_LEN)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let name = core::str::from_utf8(&raw[..end])
            .map_err(|_| Error::ProtocolViolation("service name is not ASCII"))?;
        Self::new(name)
    }
}

/// Copy `s` into a zero-padded fixed field of `N` bytes.
///
/// The last byte is always left as a terminator, so at most `N - 1` bytes
/// of `s` fit.
pub fn fixed_str<const N: usize>(s: &str) -> Result<[u8; N]> {
    let bytes = s.as_bytes();
    if bytes.len() >= N {
        return Err(Error::ProtocolViolation("string does not fit fixed field"));
    }
    let mut out = [0u8; N];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// Read a NUL-terminated string out of a fixed field.
pub fn cstr(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
