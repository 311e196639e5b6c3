use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use super::{master_index_path, Layout};
use crate::{
    bits::StuffedBits,
    error::{FormatError, ReadError},
    histogram::Histogram,
    KmerSize, Result,
};

/// First magic word of a master index ("merylInd")
pub const MASTER_MAGIC: u64 = 0x646e_496c_7972_656d;

/// Second magic word, `ex__v.0N` with the version digit in the third byte
const MASTER_MAGIC_V01: u64 = 0x3130_2e76_5f5f_7865;
const MASTER_MAGIC_V02: u64 = 0x3230_2e76_5f5f_7865;
const MASTER_MAGIC_V03: u64 = 0x3330_2e76_5f5f_7865;
const MASTER_MAGIC_V04: u64 = 0x3430_2e76_5f5f_7865;

/// Flag bit marking a multiset database
const FLAG_MULTISET: u32 = 0x0001;

/// Label width lives in flag bits 8..14; readers that only know bit 0 ignore it
const FLAG_LABEL_SHIFT: u32 = 8;
const FLAG_LABEL_MASK: u32 = 0x7f;

/// Master index format versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormatVersion {
    /// Geometry only, dense histogram
    V01,
    /// Adds the flags word
    V02,
    /// Sparse `(value, occurrences)` histogram
    V03,
    /// Same layout as v.03, written alongside labelled data blocks
    V04,
}
impl FormatVersion {
    /// Version number as stored in the magic and used by the histogram loader
    #[must_use]
    pub fn number(self) -> u32 {
        match self {
            Self::V01 => 1,
            Self::V02 => 2,
            Self::V03 => 3,
            Self::V04 => 4,
        }
    }

    #[must_use]
    pub fn magic(self) -> u64 {
        match self {
            Self::V01 => MASTER_MAGIC_V01,
            Self::V02 => MASTER_MAGIC_V02,
            Self::V03 => MASTER_MAGIC_V03,
            Self::V04 => MASTER_MAGIC_V04,
        }
    }

    #[must_use]
    pub fn has_flags(self) -> bool {
        self >= Self::V02
    }
}

/// Identifies the master index version from its two magic words.
pub fn parse_master_magic(m1: u64, m2: u64) -> Result<FormatVersion> {
    if m1 != MASTER_MAGIC {
        return Err(FormatError::InvalidMasterMagic(m1, m2).into());
    }
    match m2 {
        MASTER_MAGIC_V01 => Ok(FormatVersion::V01),
        MASTER_MAGIC_V02 => Ok(FormatVersion::V02),
        MASTER_MAGIC_V03 => Ok(FormatVersion::V03),
        MASTER_MAGIC_V04 => Ok(FormatVersion::V04),
        _ => Err(FormatError::InvalidMasterMagic(m1, m2).into()),
    }
}

/// The parsed master index of a database.
///
/// The histogram is not part of this struct; it follows the header at
/// `stats_offset` and is loaded on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterIndex {
    pub version: FormatVersion,
    pub layout: Layout,
    pub multiset: bool,
    pub label_bits: u32,

    /// Bit position of the histogram within the master index stream
    pub stats_offset: u64,
}
impl MasterIndex {
    /// A v.04 index for a new database
    #[must_use]
    pub fn new(layout: Layout, multiset: bool, label_bits: u32) -> Self {
        Self {
            version: FormatVersion::V04,
            layout,
            multiset,
            label_bits,
            stats_offset: 0,
        }
    }

    /// Parses the header fields, leaving `bits` positioned at the histogram.
    pub fn parse(bits: &mut StuffedBits) -> Result<Self> {
        let m1 = bits.get_binary(64);
        let m2 = bits.get_binary(64);
        let version = parse_master_magic(m1, m2)?;

        let prefix_size = bits.get_binary(32) as u32;
        let suffix_size = bits.get_binary(32) as u32;
        let num_files_bits = bits.get_binary(32) as u32;
        let num_blocks_bits = bits.get_binary(32) as u32;
        let flags = if version.has_flags() {
            bits.get_binary(32) as u32
        } else {
            0
        };

        if prefix_size != num_files_bits + num_blocks_bits || prefix_size > 64 {
            return Err(FormatError::InvalidPrefixSize {
                prefix: prefix_size,
                total: prefix_size + suffix_size,
            }
            .into());
        }

        Ok(Self {
            version,
            layout: Layout {
                prefix_size,
                suffix_size,
                num_files_bits,
                num_blocks_bits,
            },
            multiset: flags & FLAG_MULTISET != 0,
            label_bits: (flags >> FLAG_LABEL_SHIFT) & FLAG_LABEL_MASK,
            stats_offset: bits.position(),
        })
    }

    /// Reads the master index of the database in `dir`.
    ///
    /// Returns the header and the whole stream so the histogram can be read
    /// later from `stats_offset`.
    pub fn open(dir: &Path) -> Result<(Self, StuffedBits)> {
        let path = master_index_path(dir);
        if !path.is_file() {
            return Err(ReadError::MissingDatabase(dir.to_path_buf()).into());
        }
        let mut reader = BufReader::new(File::open(&path)?);
        let mut bits = StuffedBits::load(&mut reader)?
            .ok_or_else(|| ReadError::MissingDatabase(dir.to_path_buf()))?;
        let index = Self::parse(&mut bits)?;
        Ok((index, bits))
    }

    /// The k-mer size implied by the prefix and suffix widths
    pub fn kmer_size(&self) -> Result<KmerSize> {
        KmerSize::new(self.layout.kmer_bits() as usize / 2)
    }

    /// Fails unless the database holds k-mers of `size`.
    pub fn check_kmer_size(&self, size: KmerSize) -> Result<()> {
        let found = self.layout.kmer_bits() as usize / 2;
        if found != size.k() {
            return Err(FormatError::IncompatibleKmerSize {
                expected: size.k(),
                found,
            }
            .into());
        }
        Ok(())
    }

    fn flags(&self) -> u32 {
        u32::from(self.multiset) | ((self.label_bits & FLAG_LABEL_MASK) << FLAG_LABEL_SHIFT)
    }

    /// Appends the header and the histogram to `bits`.
    pub fn encode(&self, bits: &mut StuffedBits, histogram: &Histogram) {
        bits.set_binary(64, MASTER_MAGIC);
        bits.set_binary(64, self.version.magic());
        bits.set_binary(32, u64::from(self.layout.prefix_size));
        bits.set_binary(32, u64::from(self.layout.suffix_size));
        bits.set_binary(32, u64::from(self.layout.num_files_bits));
        bits.set_binary(32, u64::from(self.layout.num_blocks_bits));
        if self.version.has_flags() {
            bits.set_binary(32, u64::from(self.flags()));
        }
        histogram.dump(bits);
    }

    /// Writes the master index of the database in `dir`.
    pub fn write(&self, dir: &Path, histogram: &Histogram) -> Result<()> {
        let mut bits = StuffedBits::new();
        self.encode(&mut bits, histogram);
        let mut writer = BufWriter::new(File::create(master_index_path(dir))?);
        bits.dump(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}
