//! The on-disk k-mer database.
//!
//! A database is a directory holding a master index (`merylIndex`) and up to
//! 64 shards. Each shard is a data file, a concatenation of serialized
//! [`StuffedBits`](crate::bits::StuffedBits) blocks, plus a block index file
//! listing where each block starts. K-mers are split into a prefix and a
//! suffix: the top bits of the prefix choose the shard, the rest choose the
//! block within the shard, and the suffixes of a block are Elias-Fano coded.

mod block;
mod header;
mod index;
mod parallel;
mod reader;
mod writer;

use std::path::{Path, PathBuf};

pub use block::{decode_block, BlockEncoder, BlockHeader, DataVersion, DecodedBlock};
pub use header::{parse_master_magic, FormatVersion, MasterIndex};
pub use index::{BlockIndexEntry, ShardIndex};
pub(crate) use parallel::resolve_threads;
pub use parallel::{ParallelReader, ShardProcessor};
pub use reader::{BlockReader, DatabaseReader, Records};
pub use writer::{DatabaseWriter, ShardWriter, StreamWriter, WriterBuilder};

use crate::{error::FormatError, Kmer, KmerSize, Result};

/// Master index file name inside a database directory
pub const MASTER_INDEX_NAME: &str = "merylIndex";

/// Number of bits of the prefix that select a shard (64 shards)
pub const NUM_FILES_BITS: u32 = 6;

/// Prefix width used when none is requested
pub const DEFAULT_PREFIX_SIZE: u32 = 12;

/// One k-mer with its value and label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KmerRecord {
    pub kmer: Kmer,
    pub value: u64,
    pub label: u64,
}
impl KmerRecord {
    #[must_use]
    pub fn new(kmer: Kmer, value: u64, label: u64) -> Self {
        Self { kmer, value, label }
    }
}

/// How k-mer bits are split between shards, blocks and suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub prefix_size: u32,
    pub suffix_size: u32,
    pub num_files_bits: u32,
    pub num_blocks_bits: u32,
}
impl Layout {
    /// Builds the layout for `size` with a requested prefix width.
    ///
    /// A request of 0 means [`DEFAULT_PREFIX_SIZE`]. The prefix never exceeds
    /// the k-mer width, so small k-mers end up with an empty suffix and fewer
    /// shards.
    pub fn new(size: KmerSize, prefix_size: u32) -> Result<Self> {
        let total = size.bits();
        let requested = if prefix_size == 0 {
            DEFAULT_PREFIX_SIZE
        } else {
            prefix_size
        };
        let prefix_size = requested.min(total);
        if prefix_size > 64 {
            return Err(FormatError::InvalidPrefixSize {
                prefix: prefix_size,
                total,
            }
            .into());
        }
        let num_files_bits = NUM_FILES_BITS.min(prefix_size);
        Ok(Self {
            prefix_size,
            suffix_size: total - prefix_size,
            num_files_bits,
            num_blocks_bits: prefix_size - num_files_bits,
        })
    }

    /// Number of k-mer bits
    #[must_use]
    pub fn kmer_bits(&self) -> u32 {
        self.prefix_size + self.suffix_size
    }

    #[must_use]
    pub fn num_files(&self) -> u32 {
        1 << self.num_files_bits
    }

    #[must_use]
    pub fn num_blocks(&self) -> u64 {
        1 << self.num_blocks_bits
    }

    /// Mask selecting the block-within-shard bits of a prefix
    #[must_use]
    pub fn block_mask(&self) -> u64 {
        crate::bits::low_mask(u64::from(self.num_blocks_bits))
    }

    /// The shard a prefix belongs to
    #[must_use]
    pub fn file_of_prefix(&self, prefix: u64) -> u32 {
        (prefix >> self.num_blocks_bits) as u32
    }

    /// The shard a k-mer belongs to
    #[must_use]
    pub fn file_of_kmer(&self, kmer: Kmer) -> u32 {
        self.file_of_prefix(self.prefix_of(kmer))
    }

    #[must_use]
    pub fn prefix_of(&self, kmer: Kmer) -> u64 {
        kmer.prefix(self.suffix_size) as u64
    }

    #[must_use]
    pub fn suffix_of(&self, kmer: Kmer) -> u128 {
        kmer.suffix(self.suffix_size)
    }
}

/// Path of the master index of a database
#[must_use]
pub fn master_index_path(dir: &Path) -> PathBuf {
    dir.join(MASTER_INDEX_NAME)
}

/// `0x` followed by the shard number in binary, `num_files_bits` digits wide.
#[must_use]
pub fn shard_name(shard: u32, num_files_bits: u32) -> String {
    let digits: String = (0..num_files_bits)
        .rev()
        .map(|bit| if (shard >> bit) & 1 == 1 { '1' } else { '0' })
        .collect();
    format!("0x{digits}")
}

/// Path of a shard's data file
#[must_use]
pub fn data_path(dir: &Path, shard: u32, num_files_bits: u32) -> PathBuf {
    dir.join(format!("{}.merylData", shard_name(shard, num_files_bits)))
}

/// Path of a shard's block index file
#[must_use]
pub fn block_index_path(dir: &Path, shard: u32, num_files_bits: u32) -> PathBuf {
    dir.join(format!("{}.merylIndex", shard_name(shard, num_files_bits)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_names() {
        assert_eq!(shard_name(0, 6), "0x000000");
        assert_eq!(shard_name(5, 6), "0x000101");
        assert_eq!(shard_name(63, 6), "0x111111");
        let dir = Path::new("db.meryl");
        assert_eq!(
            data_path(dir, 1, 6),
            PathBuf::from("db.meryl/0x000001.merylData")
        );
        assert_eq!(
            block_index_path(dir, 1, 6),
            PathBuf::from("db.meryl/0x000001.merylIndex")
        );
    }

    #[test]
    fn test_layout_default() {
        let layout = Layout::new(KmerSize::new(21).unwrap(), 0).unwrap();
        assert_eq!(layout.prefix_size, 12);
        assert_eq!(layout.suffix_size, 30);
        assert_eq!(layout.num_files(), 64);
        assert_eq!(layout.num_blocks(), 64);
    }

    #[test]
    fn test_layout_small_k() {
        let layout = Layout::new(KmerSize::new(4).unwrap(), 0).unwrap();
        assert_eq!(layout.prefix_size, 8);
        assert_eq!(layout.suffix_size, 0);
        assert_eq!(layout.num_files_bits, 6);
        assert_eq!(layout.num_blocks_bits, 2);

        let layout = Layout::new(KmerSize::new(2).unwrap(), 0).unwrap();
        assert_eq!(layout.prefix_size, 4);
        assert_eq!(layout.num_files_bits, 4);
        assert_eq!(layout.num_blocks_bits, 0);
    }

    #[test]
    fn test_layout_routing() {
        let size = KmerSize::new(8).unwrap();
        let layout = Layout::new(size, 10).unwrap();
        assert_eq!(layout.suffix_size, 6);
        let kmer = Kmer::new(0b11_0100_0010_10_1001);
        assert_eq!(layout.prefix_of(kmer), 0b11_0100_0010);
        assert_eq!(layout.suffix_of(kmer), 0b10_1001);
        assert_eq!(layout.file_of_kmer(kmer), 0b11_0100);
    }

    #[test]
    fn test_layout_too_wide_prefix() {
        // 128 total bits, prefix capped at 64
        assert!(Layout::new(KmerSize::new(64).unwrap(), 70).is_err());
    }
}
