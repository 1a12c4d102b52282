//! Small numeric helpers shared by stubs.

/// Round `value` up to a multiple of `align` (a power of two).
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Round `value` down to a multiple of `align` (a power of two).
pub const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

/// Mask with every listed bit set.
pub fn bit(bits: &[u32]) -> u32 {
    bits.iter().fold(0, |mask, &b| mask | (1 << b))
}
