//! Two-bit packed k-mers.
//!
//! Bases are coded A=0, C=1, T=2, G=3, so the complement of any base is an
//! XOR with 2. The numeric order of the packed integer is the k-mer order used
//! everywhere: database blocks, shard selection and lookup binary searches.

mod iter;

use std::fmt;

pub use iter::{KmerIter, KmerWindow};

use crate::{error::FormatError, Result};

/// Largest supported k-mer size (128 bits of storage).
pub const MAX_KMER_SIZE: usize = 64;

const COMPLEMENT: u128 = 0xAAAA_AAAA_AAAA_AAAA_AAAA_AAAA_AAAA_AAAA;
const SWAP_2: u128 = 0x3333_3333_3333_3333_3333_3333_3333_3333;
const SWAP_4: u128 = 0x0F0F_0F0F_0F0F_0F0F_0F0F_0F0F_0F0F_0F0F;
const SWAP_8: u128 = 0x00FF_00FF_00FF_00FF_00FF_00FF_00FF_00FF;
const SWAP_16: u128 = 0x0000_FFFF_0000_FFFF_0000_FFFF_0000_FFFF;
const SWAP_32: u128 = 0x0000_0000_FFFF_FFFF_0000_0000_FFFF_FFFF;

/// ASCII letters for each two-bit code
const DECODE: [u8; 4] = [b'A', b'C', b'T', b'G'];

/// Two-bit code of an ASCII base (case-insensitive).
///
/// Only meaningful for A, C, G and T; see [`is_acgt`].
#[inline]
#[must_use]
pub const fn base_code(base: u8) -> u8 {
    (base >> 1) & 0x03
}

#[inline]
#[must_use]
pub const fn is_acgt(base: u8) -> bool {
    matches!(base, b'A' | b'C' | b'G' | b'T' | b'a' | b'c' | b'g' | b't')
}

/// The k-mer size for a run.
///
/// Every database, writer, reader and lookup is tied to one size; there is no
/// process-wide default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KmerSize {
    k: u32,
}
impl KmerSize {
    /// # Examples
    ///
    /// ```
    /// use kmerdb::KmerSize;
    ///
    /// let size = KmerSize::new(21).unwrap();
    /// assert_eq!(size.bits(), 42);
    /// assert!(KmerSize::new(0).is_err());
    /// ```
    pub fn new(k: usize) -> Result<Self> {
        if k == 0 || k > MAX_KMER_SIZE {
            return Err(FormatError::InvalidKmerSize(k).into());
        }
        Ok(Self { k: k as u32 })
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.k as usize
    }

    /// Number of bits in a packed k-mer
    #[must_use]
    pub fn bits(&self) -> u32 {
        2 * self.k
    }

    /// Mask covering all `2k` bits
    #[must_use]
    pub fn mask(&self) -> u128 {
        if self.bits() >= 128 {
            u128::MAX
        } else {
            (1u128 << self.bits()) - 1
        }
    }

    /// Mask covering the low `2k - 2` bits
    #[must_use]
    pub fn left_mask(&self) -> u128 {
        self.mask() >> 2
    }

    /// Number of distinct k-mers, `4^k`
    #[must_use]
    pub fn universe(&self) -> f64 {
        4f64.powi(self.k as i32)
    }
}
impl fmt::Display for KmerSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.k)
    }
}

/// A packed k-mer.
///
/// The size is not stored; operations that depend on it take a [`KmerSize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Kmer(pub u128);
impl Kmer {
    #[must_use]
    pub const fn new(bits: u128) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(&self) -> u128 {
        self.0
    }

    /// Builds a k-mer from its high `prefix` and low `suffix_bits` bits.
    #[must_use]
    pub fn from_prefix_suffix(prefix: u64, suffix: u128, suffix_bits: u32) -> Self {
        Self((u128::from(prefix) << suffix_bits) | suffix)
    }

    /// The bits above the low `suffix_bits`
    #[must_use]
    pub fn prefix(&self, suffix_bits: u32) -> u128 {
        if suffix_bits >= 128 {
            0
        } else {
            self.0 >> suffix_bits
        }
    }

    /// The low `suffix_bits` bits
    #[must_use]
    pub fn suffix(&self, suffix_bits: u32) -> u128 {
        if suffix_bits >= 128 {
            self.0
        } else {
            self.0 & ((1u128 << suffix_bits) - 1)
        }
    }

    /// Appends a base on the right, dropping the leftmost base.
    #[inline]
    #[must_use]
    pub fn add_r(self, base: u8, size: KmerSize) -> Self {
        Self(((self.0 << 2) & size.mask()) | u128::from(base_code(base)))
    }

    /// Prepends the complement of a base on the left, dropping the rightmost base.
    ///
    /// Feeding the bases of a sequence left to right through `add_l` builds
    /// the reverse-complement k-mer alongside the forward one.
    #[inline]
    #[must_use]
    pub fn add_l(self, base: u8, size: KmerSize) -> Self {
        let code = u128::from(base_code(base) ^ 0x02);
        Self(((self.0 >> 2) & size.left_mask()) | (code << (size.bits() - 2)))
    }

    /// # Examples
    ///
    /// ```
    /// use kmerdb::{Kmer, KmerSize};
    ///
    /// let size = KmerSize::new(5).unwrap();
    /// let kmer = Kmer::parse("AACGT", size).unwrap();
    /// assert_eq!(kmer.reverse_complement(size).as_string(size), "ACGTT");
    /// ```
    #[must_use]
    pub fn reverse_complement(self, size: KmerSize) -> Self {
        let mut m = self.0 ^ COMPLEMENT;
        m = ((m >> 2) & SWAP_2) | ((m & SWAP_2) << 2);
        m = ((m >> 4) & SWAP_4) | ((m & SWAP_4) << 4);
        m = ((m >> 8) & SWAP_8) | ((m & SWAP_8) << 8);
        m = ((m >> 16) & SWAP_16) | ((m & SWAP_16) << 16);
        m = ((m >> 32) & SWAP_32) | ((m & SWAP_32) << 32);
        m = m.rotate_left(64);
        Self((m >> (128 - size.bits())) & size.mask())
    }

    #[must_use]
    pub fn canonical(self, size: KmerSize) -> Self {
        self.min(self.reverse_complement(size))
    }

    #[must_use]
    pub fn is_canonical(self, size: KmerSize) -> bool {
        self <= self.reverse_complement(size)
    }

    #[must_use]
    pub fn is_palindrome(self, size: KmerSize) -> bool {
        self == self.reverse_complement(size)
    }

    /// Number of occurrences of `base` in the k-mer.
    #[must_use]
    pub fn count_base(self, base: u8, size: KmerSize) -> u32 {
        let code = u128::from(base_code(base));
        (0..size.k())
            .filter(|i| (self.0 >> (2 * i)) & 0x03 == code)
            .count() as u32
    }

    /// Decodes to ASCII, most-significant base first.
    #[must_use]
    pub fn as_string(self, size: KmerSize) -> String {
        (0..size.k())
            .rev()
            .map(|i| DECODE[((self.0 >> (2 * i)) & 0x03) as usize] as char)
            .collect()
    }

    /// Parses an ACGT string of exactly `size` bases (case-insensitive).
    pub fn parse(text: &str, size: KmerSize) -> Result<Self> {
        if text.len() != size.k() || !text.bytes().all(is_acgt) {
            return Err(FormatError::InvalidKmerString(text.to_string()).into());
        }
        Ok(text
            .bytes()
            .fold(Self::default(), |kmer, base| kmer.add_r(base, size)))
    }
}
impl From<u128> for Kmer {
    fn from(bits: u128) -> Self {
        Self(bits)
    }
}
