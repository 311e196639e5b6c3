//! Encoding of a single data block.
//!
//! A block holds every k-mer of one prefix. The suffixes are Elias-Fano
//! coded: the high `unary_bits` of each suffix are stored as unary deltas,
//! the remaining `binary_bits` verbatim. Values and labels follow as fixed
//! width integers.

use crate::{
    bits::{bit_len, StuffedBits},
    error::{FormatError, WriteError},
    Result,
};

/// First magic word of a data block ("merylDat")
pub const DATA_MAGIC: u64 = 0x7461_446c_7972_656d;

/// Second magic word ("aFile00\n" / "aFile01\n")
const DATA_MAGIC_V00: u64 = 0x0a30_3065_6c69_4661;
const DATA_MAGIC_V01: u64 = 0x0a31_3065_6c69_4661;

/// Clears the version digits of the second magic word
const DATA_VERSION_MASK: u64 = 0xfff0_f0ff_ffff_ffff;

/// Suffixes are Elias-Fano coded
const KMER_CODE_ELIAS_FANO: u64 = 1;

const VALUE_CODE_NONE: u64 = 0;
const VALUE_CODE_32: u64 = 1;
const VALUE_CODE_64: u64 = 2;

const LABEL_CODE_NONE: u64 = 0;
const LABEL_CODE_BINARY: u64 = 1;

/// Widest label the block header can describe
pub const MAX_LABEL_BITS: u32 = 58;

/// Data block versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataVersion {
    /// Suffixes and values only
    V00,
    /// Adds the label coding fields
    V01,
}
impl DataVersion {
    fn from_magic(m1: u64, m2: u64) -> Result<Self> {
        if m1 == DATA_MAGIC {
            match m2 {
                DATA_MAGIC_V00 => return Ok(Self::V00),
                DATA_MAGIC_V01 => return Ok(Self::V01),
                _ if m2 & DATA_VERSION_MASK == DATA_MAGIC_V00 => {
                    return Err(FormatError::UnsupportedDataVersion(m2).into())
                }
                _ => {}
            }
        }
        Err(FormatError::InvalidDataMagic(m1, m2).into())
    }

    fn magic(self) -> u64 {
        match self {
            Self::V00 => DATA_MAGIC_V00,
            Self::V01 => DATA_MAGIC_V01,
        }
    }
}

/// The fixed fields at the start of every data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: DataVersion,
    pub prefix: u64,
    pub num_kmers: u64,

    pub kmer_code: u64,
    pub unary_bits: u32,
    pub binary_bits: u32,
    pub k1: u64,

    pub value_code: u64,
    pub c1: u64,
    pub c2: u64,

    pub label_code: u64,
    pub label_bits: u32,
    pub l1: u64,
    pub l2: u64,
}
impl BlockHeader {
    /// Reads and validates a header, leaving `bits` at the first suffix.
    pub fn parse(bits: &mut StuffedBits) -> Result<Self> {
        let m1 = bits.get_binary(64);
        let m2 = bits.get_binary(64);
        let version = DataVersion::from_magic(m1, m2)?;

        let prefix = bits.get_binary(64);
        let num_kmers = bits.get_binary(64);

        let kmer_code = bits.get_binary(8);
        let unary_bits = bits.get_binary(32) as u32;
        let binary_bits = bits.get_binary(32) as u32;
        let k1 = bits.get_binary(64);

        let value_code = bits.get_binary(8);
        let c1 = bits.get_binary(64);
        let c2 = bits.get_binary(64);

        let (label_code, label_bits, l1, l2) = match version {
            DataVersion::V00 => (LABEL_CODE_NONE, 0, 0, 0),
            DataVersion::V01 => (
                bits.get_binary(8),
                bits.get_binary(6) as u32,
                bits.get_binary(58),
                bits.get_binary(64),
            ),
        };

        let header = Self {
            version,
            prefix,
            num_kmers,
            kmer_code,
            unary_bits,
            binary_bits,
            k1,
            value_code,
            c1,
            c2,
            label_code,
            label_bits,
            l1,
            l2,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.kmer_code != KMER_CODE_ELIAS_FANO {
            return Err(FormatError::UnknownCoding {
                kind: "suffix",
                code: self.kmer_code,
            }
            .into());
        }
        if !matches!(self.value_code, VALUE_CODE_NONE | VALUE_CODE_32 | VALUE_CODE_64) {
            return Err(FormatError::UnknownCoding {
                kind: "value",
                code: self.value_code,
            }
            .into());
        }
        if !matches!(self.label_code, LABEL_CODE_NONE | LABEL_CODE_BINARY) {
            return Err(FormatError::UnknownCoding {
                kind: "label",
                code: self.label_code,
            }
            .into());
        }
        Ok(())
    }

    fn write(&self, bits: &mut StuffedBits) {
        bits.set_binary(64, DATA_MAGIC);
        bits.set_binary(64, self.version.magic());
        bits.set_binary(64, self.prefix);
        bits.set_binary(64, self.num_kmers);

        bits.set_binary(8, self.kmer_code);
        bits.set_binary(32, u64::from(self.unary_bits));
        bits.set_binary(32, u64::from(self.binary_bits));
        bits.set_binary(64, self.k1);

        bits.set_binary(8, self.value_code);
        bits.set_binary(64, self.c1);
        bits.set_binary(64, self.c2);

        if self.version == DataVersion::V01 {
            bits.set_binary(8, self.label_code);
            bits.set_binary(6, u64::from(self.label_bits));
            bits.set_binary(58, self.l1);
            bits.set_binary(64, self.l2);
        }
    }

    /// Widths of the high and low binary parts of each suffix
    fn binary_split(&self) -> (u64, u64) {
        let binary_bits = u64::from(self.binary_bits);
        if binary_bits > 64 {
            (binary_bits - 64, 64)
        } else {
            (0, binary_bits)
        }
    }
}

/// The decoded contents of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBlock {
    pub prefix: u64,
    pub suffixes: Vec<u128>,
    pub values: Vec<u64>,
    pub labels: Vec<u64>,
}
impl DecodedBlock {
    #[must_use]
    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    /// Decodes the body of a block whose header was just parsed.
    pub(crate) fn decode(header: &BlockHeader, bits: &mut StuffedBits) -> Self {
        let n = header.num_kmers as usize;
        let (ls, rs) = header.binary_split();

        let mut suffixes = Vec::with_capacity(n);
        let mut high = 0u128;
        for _ in 0..n {
            high += u128::from(bits.get_unary());
            let mut suffix = (high << ls) | u128::from(bits.get_binary(ls));
            suffix = (suffix << rs) | u128::from(bits.get_binary(rs));
            suffixes.push(suffix);
        }

        let values = match header.value_code {
            VALUE_CODE_32 => bits.get_binary_array(32, n),
            VALUE_CODE_64 => bits.get_binary_array(64, n),
            _ => vec![0; n],
        };

        let labels = match header.label_code {
            LABEL_CODE_BINARY => bits.get_binary_array(u64::from(header.label_bits), n),
            _ => vec![0; n],
        };

        Self {
            prefix: header.prefix,
            suffixes,
            values,
            labels,
        }
    }
}

/// Parses the header and decodes the whole block.
pub fn decode_block(bits: &mut StuffedBits) -> Result<DecodedBlock> {
    let header = BlockHeader::parse(bits)?;
    Ok(DecodedBlock::decode(&header, bits))
}

/// Smallest `u` with `2^u >= n`.
#[must_use]
pub fn unary_bits_for(num_kmers: u64) -> u32 {
    if num_kmers <= 1 {
        0
    } else {
        bit_len(num_kmers - 1) as u32
    }
}

/// Estimated size of an encoded block in bits, used as the segment size of
/// its bit stream.
#[must_use]
pub fn block_size_bits(num_kmers: u64, unary_bits: u32, binary_bits: u32) -> u64 {
    let unary_sum = 1u64 << unary_bits;
    let bits = 10 * 64
        + 2 * unary_sum
        + num_kmers * u64::from(binary_bits) / 16
        + num_kmers * 32 / 16;
    (bits & !0x3ff) + 1024
}

/// Fails on the first suffix below its predecessor, or equal to it when
/// `strict`.
pub fn check_sorted(prefix: u64, suffixes: &[u128], strict: bool) -> Result<()> {
    for (position, pair) in suffixes.windows(2).enumerate() {
        let bad = if strict {
            pair[1] <= pair[0]
        } else {
            pair[1] < pair[0]
        };
        if bad {
            return Err(WriteError::UnsortedInput {
                prefix,
                position: position + 1,
            }
            .into());
        }
    }
    Ok(())
}

/// Encodes blocks for one database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEncoder {
    suffix_size: u32,
    label_bits: u32,

    /// Cap on the segment size of the bit stream
    max_bits: Option<u64>,
}
impl BlockEncoder {
    pub fn new(suffix_size: u32, label_bits: u32) -> Result<Self> {
        if label_bits > MAX_LABEL_BITS {
            return Err(WriteError::InvalidLabelBits(label_bits).into());
        }
        Ok(Self {
            suffix_size,
            label_bits,
            max_bits: None,
        })
    }

    #[must_use]
    pub fn with_max_bits(mut self, max_bits: Option<u64>) -> Self {
        self.max_bits = max_bits;
        self
    }

    /// Encodes a block of sorted suffixes with their values and labels.
    ///
    /// Fails if `suffixes` descend anywhere; equal neighbors are accepted.
    /// `labels` may be empty, in which case every label is 0. When the
    /// encoder has no label width no labels are stored.
    pub fn encode(
        &self,
        prefix: u64,
        suffixes: &[u128],
        values: &[u64],
        labels: &[u64],
    ) -> Result<StuffedBits> {
        let n = suffixes.len();
        if values.len() != n || (!labels.is_empty() && labels.len() != n) {
            return Err(WriteError::MismatchedBlock {
                suffixes: n,
                values: values.len(),
            }
            .into());
        }
        check_sorted(prefix, suffixes, false)?;
        let label_bits = self.label_bits;

        let num_kmers = n as u64;
        let unary_bits = unary_bits_for(num_kmers);
        let binary_bits = self.suffix_size.saturating_sub(unary_bits);

        let value_code = if values.iter().any(|&v| v > u64::from(u32::MAX)) {
            VALUE_CODE_64
        } else {
            VALUE_CODE_32
        };
        let label_code = if label_bits > 0 {
            LABEL_CODE_BINARY
        } else {
            LABEL_CODE_NONE
        };

        let header = BlockHeader {
            version: DataVersion::V01,
            prefix,
            num_kmers,
            kmer_code: KMER_CODE_ELIAS_FANO,
            unary_bits,
            binary_bits,
            k1: 0,
            value_code,
            c1: 0,
            c2: 0,
            label_code,
            label_bits,
            l1: 0,
            l2: 0,
        };

        let mut block_bits = block_size_bits(num_kmers, unary_bits, binary_bits);
        if let Some(max_bits) = self.max_bits {
            block_bits = block_bits.min(max_bits);
        }
        let mut bits = StuffedBits::with_max_bits(block_bits);
        header.write(&mut bits);

        let (ls, rs) = header.binary_split();
        let mut last_high = 0u128;
        for &suffix in suffixes {
            let high = suffix >> binary_bits;
            bits.set_unary((high - last_high) as u64);
            bits.set_binary(ls, (suffix >> 64) as u64);
            bits.set_binary(rs, suffix as u64);
            last_high = high;
        }

        let value_width = if value_code == VALUE_CODE_64 { 64 } else { 32 };
        bits.set_binary_array(value_width, values);

        if label_code == LABEL_CODE_BINARY {
            let width = u64::from(label_bits);
            if labels.is_empty() {
                for _ in 0..n {
                    bits.set_binary(width, 0);
                }
            } else {
                bits.set_binary_array(width, labels);
            }
        }

        Ok(bits)
    }
}
