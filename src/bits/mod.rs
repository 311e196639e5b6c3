//! Bit-level storage used by the database format and the lookup tables.
//!
//! [`StuffedBits`] is a positioned, growable bit stream over a list of
//! fixed-capacity segments. It stores fixed-width binary fields and the
//! variable-length unary, Elias-gamma, Elias-delta and Zeckendorf codes.
//! [`PackedArray`] is a random-access array of fixed-width integers.

mod codes;
mod fibonacci;
mod packed;
mod stuffed;

pub use fibonacci::{FIBONACCI, FIBONACCI_LEN};
pub use packed::PackedArray;
pub use stuffed::{StuffedBits, DEFAULT_MAX_BITS};

/// Returns a mask with the low `bits` bits set (saturating at 64).
#[inline]
#[must_use]
pub const fn low_mask(bits: u64) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Returns the number of bits needed to represent `value` (0 for 0).
#[inline]
#[must_use]
pub const fn bit_len(value: u64) -> u64 {
    (u64::BITS - value.leading_zeros()) as u64
}
