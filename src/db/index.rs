use std::fs::File;
use std::io::Write;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;

use crate::{error::ReadError, Result};

/// Where one block of a shard lives in its data file.
///
/// This is stored identically in memory and on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct BlockIndexEntry {
    /// Full prefix of the block; 0 together with `num_kmers == 0` for an unused slot
    pub block_prefix: u32,
    _pad: u32,

    /// Byte offset of the block in the data file
    pub block_position: u64,

    pub num_kmers: u64,
}
impl BlockIndexEntry {
    #[must_use]
    pub fn new(block_prefix: u64, block_position: u64, num_kmers: u64) -> Self {
        Self {
            block_prefix: block_prefix as u32,
            _pad: 0,
            block_position,
            num_kmers,
        }
    }
}

/// The block index of one shard: one entry per block slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardIndex {
    entries: Vec<BlockIndexEntry>,
}
impl ShardIndex {
    /// An index with `num_blocks` empty slots
    #[must_use]
    pub fn new(num_blocks: u64) -> Self {
        Self {
            entries: vec![BlockIndexEntry::default(); num_blocks as usize],
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.entries)
    }

    /// Builds the index from raw bytes; the byte count must match `num_blocks`.
    pub fn from_bytes(bytes: &[u8], num_blocks: u64) -> Result<Self> {
        let entry_size = size_of::<BlockIndexEntry>();
        let expected = num_blocks as usize * entry_size;
        if bytes.len() != expected {
            return Err(ReadError::BlockIndexSize {
                found: bytes.len(),
                expected,
            }
            .into());
        }
        let entries = bytes
            .chunks_exact(entry_size)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        Ok(Self { entries })
    }

    /// Memory-maps and reads an index file.
    pub fn open<P: AsRef<Path>>(path: P, num_blocks: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        if !file.metadata()?.is_file() {
            return Err(ReadError::IncompatibleFile(path.to_path_buf()).into());
        }

        // Safety: the file is open and won't be modified while mapped
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_bytes(&mmap, num_blocks)
    }

    /// Writes the raw entries to `path`.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(self.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Records a block at its slot, `prefix & block_mask`.
    pub fn set(&mut self, prefix: u64, block_mask: u64, position: u64, num_kmers: u64) {
        let slot = (prefix & block_mask) as usize;
        self.entries[slot] = BlockIndexEntry::new(prefix, position, num_kmers);
    }

    #[must_use]
    pub fn entry(&self, slot: usize) -> Option<&BlockIndexEntry> {
        self.entries.get(slot)
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.entries.len()
    }

    /// Total number of k-mers in the shard
    #[must_use]
    pub fn num_kmers(&self) -> u64 {
        self.entries.iter().map(|e| e.num_kmers).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockIndexEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_layout() {
        assert_eq!(size_of::<BlockIndexEntry>(), 24);
    }

    #[test]
    fn test_set_and_bytes() {
        let mut index = ShardIndex::new(4);
        index.set(0b1110, 0b11, 100, 7);
        index.set(0b1101, 0b11, 0, 2);

        assert_eq!(index.entry(2).unwrap().block_prefix, 0b1110);
        assert_eq!(index.entry(2).unwrap().block_position, 100);
        assert_eq!(index.entry(1).unwrap().num_kmers, 2);
        assert_eq!(index.num_kmers(), 9);
        assert!(index.entry(4).is_none());

        let restored = ShardIndex::from_bytes(index.as_bytes(), 4).unwrap();
        assert_eq!(restored, index);
    }

    #[test]
    fn test_size_mismatch() {
        let index = ShardIndex::new(4);
        assert!(ShardIndex::from_bytes(index.as_bytes(), 8).is_err());
    }

    #[test]
    fn test_unaligned_bytes() {
        let mut index = ShardIndex::new(2);
        index.set(1, 1, 48, 3);
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(index.as_bytes());
        let restored = ShardIndex::from_bytes(&shifted[1..], 2).unwrap();
        assert_eq!(restored, index);
    }

    #[test]
    fn test_write_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0x000000.merylIndex");
        let mut index = ShardIndex::new(8);
        index.set(5, 7, 1024, 11);
        index.write(&path).unwrap();
        assert_eq!(ShardIndex::open(&path, 8).unwrap(), index);
    }
}
