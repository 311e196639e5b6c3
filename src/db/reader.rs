//! Reading databases.

use std::fs::File;
use std::io::Cursor;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use super::{
    block::{BlockHeader, DecodedBlock},
    block_index_path, data_path,
    header::{FormatVersion, MasterIndex},
    index::ShardIndex,
    KmerRecord, Layout,
};
use crate::{
    bits::StuffedBits,
    error::ReadError,
    histogram::Histogram,
    Kmer, KmerSize, Result,
};

/// Sequential reader over the blocks of one shard data file.
///
/// The file is memory-mapped; each [`load_block`](Self::load_block) reads the
/// next serialized block and parses its header, and [`decode`](Self::decode)
/// expands the body.
pub struct BlockReader {
    /// `None` for an empty data file
    mmap: Option<Arc<Mmap>>,

    /// Byte offset of the next block
    offset: usize,

    shard: u32,
    bits: StuffedBits,
    header: Option<BlockHeader>,
}
impl BlockReader {
    /// Opens a shard data file.
    pub fn open<P: AsRef<Path>>(path: P, shard: u32) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(ReadError::IncompatibleFile(path.to_path_buf()).into());
        }

        let mmap = if metadata.len() == 0 {
            None
        } else {
            // Safety: the file is open and won't be modified while mapped
            Some(Arc::new(unsafe { Mmap::map(&file)? }))
        };

        Ok(Self {
            mmap,
            offset: 0,
            shard,
            bits: StuffedBits::new(),
            header: None,
        })
    }

    #[must_use]
    pub fn shard(&self) -> u32 {
        self.shard
    }

    /// Byte offset of the next block to load
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Moves to a block position taken from the shard's block index.
    pub fn seek(&mut self, offset: u64) {
        self.offset = offset as usize;
        self.header = None;
    }

    /// Reads the next block and parses its header.
    ///
    /// Returns `false` once the data file is exhausted.
    pub fn load_block(&mut self) -> Result<bool> {
        self.header = None;
        let Some(mmap) = self.mmap.as_ref() else {
            return Ok(false);
        };
        let Some(remaining) = mmap.get(self.offset..) else {
            return Ok(false);
        };

        let mut cursor = Cursor::new(remaining);
        if !self.bits.load_into(&mut cursor)? || self.bits.length() == 0 {
            return Ok(false);
        }
        self.offset += cursor.position() as usize;

        self.header = Some(BlockHeader::parse(&mut self.bits)?);
        Ok(true)
    }

    /// The header of the last loaded block
    #[must_use]
    pub fn header(&self) -> Option<&BlockHeader> {
        self.header.as_ref()
    }

    /// Decodes the body of the last loaded block.
    ///
    /// Returns an empty block if nothing is loaded.
    pub fn decode(&mut self) -> DecodedBlock {
        match self.header.take() {
            Some(header) => DecodedBlock::decode(&header, &mut self.bits),
            None => DecodedBlock::default(),
        }
    }
}

/// Iterates the k-mers of a database in ascending order.
///
/// Iteration walks shard by shard, block by block. With
/// [`enable_threads`](Self::enable_threads) it is restricted to a single
/// shard so that several readers can split a database between threads.
pub struct DatabaseReader {
    dir: PathBuf,
    index: MasterIndex,
    size: KmerSize,

    /// Master index stream, kept for lazy statistics loading
    master: StuffedBits,
    stats: Option<Histogram>,

    shards: Range<u32>,
    shard: u32,
    block_reader: Option<BlockReader>,
    block: DecodedBlock,
    position: usize,
    record: KmerRecord,
}
impl DatabaseReader {
    /// Opens the database in `dir`, which must hold k-mers of `size`.
    pub fn open<P: AsRef<Path>>(dir: P, size: KmerSize) -> Result<Self> {
        let reader = Self::open_unchecked(dir)?;
        reader.index.check_kmer_size(size)?;
        Ok(reader)
    }

    /// Opens the database in `dir`, taking the k-mer size from its index.
    pub fn open_unchecked<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let (index, master) = MasterIndex::open(&dir)?;
        let size = index.kmer_size()?;
        log::debug!(
            "opened database {} (v{}, {}-mers, {} shards)",
            dir.display(),
            index.version.number(),
            size.k(),
            index.layout.num_files()
        );
        Ok(Self {
            dir,
            index,
            size,
            master,
            stats: None,
            shards: 0..index.layout.num_files(),
            shard: 0,
            block_reader: None,
            block: DecodedBlock::default(),
            position: 0,
            record: KmerRecord::default(),
        })
    }

    /// Restricts iteration to `shard` and restarts it.
    pub fn enable_threads(&mut self, shard: u32) -> Result<()> {
        let num_files = self.index.layout.num_files();
        if shard >= num_files {
            return Err(ReadError::ShardOutOfRange {
                requested: shard,
                max: num_files,
            }
            .into());
        }
        self.shards = shard..shard + 1;
        self.rewind();
        Ok(())
    }

    /// Restarts iteration at the first k-mer of the current shard range.
    pub fn rewind(&mut self) {
        self.shard = self.shards.start;
        self.block_reader = None;
        self.block = DecodedBlock::default();
        self.position = 0;
        self.record = KmerRecord::default();
    }

    /// Advances to the next k-mer.
    ///
    /// Returns `false` when the database (or the enabled shard) is exhausted.
    pub fn next_mer(&mut self) -> Result<bool> {
        loop {
            if self.position < self.block.len() {
                let suffix_size = self.index.layout.suffix_size;
                let idx = self.position;
                self.record = KmerRecord {
                    kmer: Kmer::from_prefix_suffix(
                        self.block.prefix,
                        self.block.suffixes[idx],
                        suffix_size,
                    ),
                    value: self.block.values[idx],
                    label: self.block.labels[idx],
                };
                self.position += 1;
                return Ok(true);
            }

            if let Some(reader) = self.block_reader.as_mut() {
                if reader.load_block()? {
                    self.block = reader.decode();
                    self.position = 0;
                    continue;
                }
                self.block_reader = None;
                self.shard += 1;
            }

            if self.shard >= self.shards.end {
                return Ok(false);
            }

            let path = data_path(&self.dir, self.shard, self.index.layout.num_files_bits);
            if path.is_file() {
                self.block_reader = Some(BlockReader::open(path, self.shard)?);
            } else {
                log::warn!("shard {} of {} is missing", self.shard, self.dir.display());
                self.shard += 1;
            }
        }
    }

    /// The current record
    #[must_use]
    pub fn record(&self) -> KmerRecord {
        self.record
    }

    #[must_use]
    pub fn kmer(&self) -> Kmer {
        self.record.kmer
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.record.value
    }

    #[must_use]
    pub fn label(&self) -> u64 {
        self.record.label
    }

    /// Loads the histogram stored in the master index, once.
    pub fn load_statistics(&mut self) -> &Histogram {
        let version = self.index.version.number();
        let offset = self.index.stats_offset;
        let master = &mut self.master;
        self.stats.get_or_insert_with(|| {
            master.set_position(offset);
            Histogram::load(master, version)
        })
    }

    /// The histogram, if [`load_statistics`](Self::load_statistics) has run
    #[must_use]
    pub fn statistics(&self) -> Option<&Histogram> {
        self.stats.as_ref()
    }

    /// Releases the loaded histogram.
    pub fn drop_statistics(&mut self) {
        self.stats = None;
    }

    /// Reads the block index of one shard.
    pub fn shard_index(&self, shard: u32) -> Result<ShardIndex> {
        let layout = self.index.layout;
        if shard >= layout.num_files() {
            return Err(ReadError::ShardOutOfRange {
                requested: shard,
                max: layout.num_files(),
            }
            .into());
        }
        ShardIndex::open(
            block_index_path(&self.dir, shard, layout.num_files_bits),
            layout.num_blocks(),
        )
    }

    /// Iterates the remaining records.
    pub fn records(&mut self) -> Records<'_> {
        Records { reader: self }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn kmer_size(&self) -> KmerSize {
        self.size
    }

    #[must_use]
    pub fn layout(&self) -> Layout {
        self.index.layout
    }

    #[must_use]
    pub fn prefix_size(&self) -> u32 {
        self.index.layout.prefix_size
    }

    #[must_use]
    pub fn suffix_size(&self) -> u32 {
        self.index.layout.suffix_size
    }

    #[must_use]
    pub fn num_files(&self) -> u32 {
        self.index.layout.num_files()
    }

    #[must_use]
    pub fn is_multiset(&self) -> bool {
        self.index.multiset
    }

    #[must_use]
    pub fn version(&self) -> FormatVersion {
        self.index.version
    }

    #[must_use]
    pub fn label_bits(&self) -> u32 {
        self.index.label_bits
    }
}

/// Iterator over the records of a [`DatabaseReader`]
pub struct Records<'a> {
    reader: &'a mut DatabaseReader,
}
impl Iterator for Records<'_> {
    type Item = Result<KmerRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.next_mer() {
            Ok(true) => Some(Ok(self.reader.record())),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::WriterBuilder;

    fn size(k: usize) -> KmerSize {
        KmerSize::new(k).unwrap()
    }

    /// Writes `kmers` (ascending) with value = index + 1.
    fn write_db(dir: &Path, k: usize, kmers: &[u128]) {
        let writer = WriterBuilder::default().build(dir, size(k)).unwrap();
        let mut stream = writer.stream();
        for (idx, &kmer) in kmers.iter().enumerate() {
            stream.add_mer(Kmer::new(kmer), idx as u64 + 1, 0).unwrap();
        }
        stream.finish().unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_iterates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let kmers: Vec<u128> = (0..5000u128).map(|i| i * 7919 % (1 << 20)).collect();
        let mut sorted = kmers.clone();
        sorted.sort_unstable();
        sorted.dedup();
        write_db(dir.path(), 10, &sorted);

        let mut reader = DatabaseReader::open(dir.path(), size(10)).unwrap();
        let records: Vec<KmerRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(records.len(), sorted.len());
        for (idx, record) in records.iter().enumerate() {
            assert_eq!(record.kmer.bits(), sorted[idx]);
            assert_eq!(record.value, idx as u64 + 1);
        }
    }

    #[test]
    fn test_wrong_kmer_size() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), 10, &[1, 2, 3]);
        let err = DatabaseReader::open(dir.path(), size(11)).err().unwrap();
        assert!(err.is_kmer_size_mismatch());
        assert_eq!(
            DatabaseReader::open_unchecked(dir.path())
                .unwrap()
                .kmer_size()
                .k(),
            10
        );
    }

    #[test]
    fn test_single_shard() {
        let dir = tempfile::tempdir().unwrap();
        // k=10: 20 bits, prefix 12, suffix 8, shard = top 6 bits
        let kmers = [0x0_0001, 0x0_4002, 0x4_0003, 0x4_0004, 0xf_ff00];
        write_db(dir.path(), 10, &kmers);

        let mut reader = DatabaseReader::open(dir.path(), size(10)).unwrap();
        reader.enable_threads(16).unwrap();
        let mut seen = Vec::new();
        while reader.next_mer().unwrap() {
            seen.push(reader.kmer().bits());
        }
        assert_eq!(seen, vec![0x4_0003, 0x4_0004]);
        assert!(reader.enable_threads(64).is_err());
    }

    #[test]
    fn test_statistics_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), 10, &[1, 2, 3]);
        let mut reader = DatabaseReader::open(dir.path(), size(10)).unwrap();
        assert!(reader.statistics().is_none());
        let stats = reader.load_statistics();
        assert_eq!(stats.num_distinct(), 3);
        assert_eq!(stats.num_total(), 6);
        assert_eq!(stats.num_unique(), 1);
        assert!(reader.statistics().is_some());

        assert_eq!(reader.prefix_size(), 12);
        assert_eq!(reader.suffix_size(), 8);
        assert_eq!(reader.num_files(), 64);
        assert!(!reader.is_multiset());
        assert_eq!(reader.version(), FormatVersion::V04);
        assert_eq!(reader.label_bits(), 0);
    }

    #[test]
    fn test_shard_index() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), 10, &[0x0_0001, 0x0_0102, 0x0_0103]);
        let reader = DatabaseReader::open(dir.path(), size(10)).unwrap();
        let index = reader.shard_index(0).unwrap();
        assert_eq!(index.num_blocks(), 64);
        assert_eq!(index.num_kmers(), 3);
        assert_eq!(index.entry(0).unwrap().num_kmers, 1);
        assert_eq!(index.entry(1).unwrap().num_kmers, 2);
        assert_eq!(index.entry(0).unwrap().block_position, 0);
        assert!(index.entry(1).unwrap().block_position > 0);
    }

    #[test]
    fn test_block_reader_seek() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), 10, &[0x0_0001, 0x0_0102, 0x0_0103]);
        let reader = DatabaseReader::open(dir.path(), size(10)).unwrap();
        let entry = *reader.shard_index(0).unwrap().entry(1).unwrap();

        let mut blocks = BlockReader::open(data_path(dir.path(), 0, 6), 0).unwrap();
        blocks.seek(entry.block_position);
        assert!(blocks.load_block().unwrap());
        assert_eq!(blocks.header().unwrap().num_kmers, 2);
        let block = blocks.decode();
        assert_eq!(block.prefix, 1);
        assert_eq!(block.suffixes, vec![2, 3]);
        assert!(!blocks.load_block().unwrap());
    }

    #[test]
    fn test_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DatabaseReader::open_unchecked(dir.path().join("nope")).is_err());
    }
}
