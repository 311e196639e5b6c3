//! Writing databases.
//!
//! A [`DatabaseWriter`] owns the output directory and the merged statistics.
//! Shards are written independently through [`ShardWriter`]s, which may live
//! on different threads, or sequentially through a [`StreamWriter`] that
//! accepts k-mers in ascending order.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::{
    block::{check_sorted, BlockEncoder},
    block_index_path, data_path,
    header::MasterIndex,
    index::ShardIndex,
    Layout,
};
use crate::{error::WriteError, histogram::Histogram, Kmer, KmerSize, Result};

/// A builder for [`DatabaseWriter`]
#[derive(Debug, Default, Clone, Copy)]
pub struct WriterBuilder {
    prefix_size: Option<u32>,
    label_bits: Option<u32>,
    multiset: Option<bool>,
    max_block_bits: Option<u64>,
}
impl WriterBuilder {
    /// Bits of each k-mer used to pick its shard and block (0 or unset for the default)
    #[must_use]
    pub fn prefix_size(mut self, prefix_size: u32) -> Self {
        self.prefix_size = Some(prefix_size);
        self
    }

    /// Width of the label stored with each k-mer
    #[must_use]
    pub fn label_bits(mut self, label_bits: u32) -> Self {
        self.label_bits = Some(label_bits);
        self
    }

    /// Allow the same k-mer more than once
    #[must_use]
    pub fn multiset(mut self, multiset: bool) -> Self {
        self.multiset = Some(multiset);
        self
    }

    /// Upper bound on the segment size of each encoded block
    #[must_use]
    pub fn max_block_bits(mut self, max_block_bits: u64) -> Self {
        self.max_block_bits = Some(max_block_bits);
        self
    }

    /// Creates the output directory and a writer for k-mers of `size`.
    pub fn build<P: AsRef<Path>>(self, dir: P, size: KmerSize) -> Result<DatabaseWriter> {
        let label_bits = self.label_bits.unwrap_or(0);
        let layout = Layout::new(size, self.prefix_size.unwrap_or(0))?;
        let encoder =
            BlockEncoder::new(layout.suffix_size, label_bits)?.with_max_bits(self.max_block_bits);

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        log::info!(
            "creating database {} for {}-mers ({} prefix bits, {} shards)",
            dir.display(),
            size.k(),
            layout.prefix_size,
            layout.num_files()
        );

        Ok(DatabaseWriter {
            dir,
            size,
            layout,
            label_bits,
            multiset: self.multiset.unwrap_or(false),
            encoder,
            histogram: Mutex::new(Histogram::default()),
            finished: Mutex::new(vec![false; layout.num_files() as usize]),
        })
    }
}

/// Writes a database directory.
pub struct DatabaseWriter {
    dir: PathBuf,
    size: KmerSize,
    layout: Layout,
    label_bits: u32,
    multiset: bool,
    encoder: BlockEncoder,

    /// Statistics merged from every finished shard
    histogram: Mutex<Histogram>,

    /// Which shards have been written
    finished: Mutex<Vec<bool>>,
}
impl DatabaseWriter {
    /// Sets the prefix width.
    ///
    /// Asking again for the width already in use does nothing; asking for a
    /// different one is an error.
    pub fn initialize(&mut self, prefix_size: u32) -> Result<()> {
        let requested = Layout::new(self.size, prefix_size)?;
        if requested.prefix_size != self.layout.prefix_size {
            return Err(WriteError::PrefixSizeChanged {
                current: self.layout.prefix_size,
                requested: requested.prefix_size,
            }
            .into());
        }
        Ok(())
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
        self.layout
    }

    #[must_use]
    pub fn label_bits(&self) -> u32 {
        self.label_bits
    }

    #[must_use]
    pub fn is_multiset(&self) -> bool {
        self.multiset
    }

    /// A copy of the statistics merged so far
    #[must_use]
    pub fn histogram(&self) -> Histogram {
        self.histogram.lock().clone()
    }

    /// Opens shard `shard` for writing.
    pub fn shard(&self, shard: u32) -> Result<ShardWriter<'_>> {
        if shard >= self.layout.num_files() {
            return Err(WriteError::ShardOutOfRange(shard).into());
        }
        let path = data_path(&self.dir, shard, self.layout.num_files_bits);
        Ok(ShardWriter {
            parent: self,
            shard,
            data: BufWriter::new(File::create(path)?),
            position: 0,
            index: ShardIndex::new(self.layout.num_blocks()),
            histogram: Histogram::default(),
            num_kmers: 0,
        })
    }

    /// A writer that takes k-mers in ascending order across all shards.
    #[must_use]
    pub fn stream(&self) -> StreamWriter<'_> {
        StreamWriter {
            parent: self,
            shard: None,
            prefix: 0,
            suffixes: Vec::new(),
            values: Vec::new(),
            labels: Vec::new(),
            last: None,
        }
    }

    /// Writes empty files for unused shards and the master index.
    pub fn finish(self) -> Result<Histogram> {
        let finished = std::mem::take(&mut *self.finished.lock());
        for (shard, done) in finished.into_iter().enumerate() {
            if !done {
                self.shard(shard as u32)?.finish()?;
            }
        }

        let histogram = self.histogram.into_inner();
        MasterIndex::new(self.layout, self.multiset, self.label_bits).write(&self.dir, &histogram)?;
        log::info!(
            "finished database {}: {} distinct {}-mers, {} total",
            self.dir.display(),
            histogram.num_distinct(),
            self.size.k(),
            histogram.num_total()
        );
        Ok(histogram)
    }
}

/// Writes the blocks of one shard.
pub struct ShardWriter<'a> {
    parent: &'a DatabaseWriter,
    shard: u32,
    data: BufWriter<File>,

    /// Bytes written to the data file so far
    position: u64,

    index: ShardIndex,
    histogram: Histogram,
    num_kmers: u64,
}
impl ShardWriter<'_> {
    #[must_use]
    pub fn shard(&self) -> u32 {
        self.shard
    }

    /// Encodes and appends the block for `prefix`.
    ///
    /// `suffixes` must be ascending (strictly, unless the database is a
    /// multiset). `labels` may be empty when every label is 0. An empty
    /// block writes nothing.
    pub fn add_block(
        &mut self,
        prefix: u64,
        suffixes: &[u128],
        values: &[u64],
        labels: &[u64],
    ) -> Result<()> {
        let layout = self.parent.layout;
        if layout.file_of_prefix(prefix) != self.shard {
            return Err(WriteError::ShardOutOfRange(layout.file_of_prefix(prefix)).into());
        }
        if suffixes.is_empty() {
            return Ok(());
        }
        check_sorted(prefix, suffixes, !self.parent.multiset)?;

        let bits = self
            .parent
            .encoder
            .encode(prefix, suffixes, values, labels)?;
        let bytes = bits.to_bytes()?;
        self.data.write_all(&bytes)?;
        let num_kmers = suffixes.len() as u64;
        self.index
            .set(prefix, layout.block_mask(), self.position, num_kmers);
        self.position += bytes.len() as u64;

        for &value in values {
            self.histogram.add_value(value, 1);
        }
        self.num_kmers += num_kmers;

        log::debug!(
            "shard {} block 0x{prefix:x}: {num_kmers} k-mers, {} bytes",
            self.shard,
            bytes.len()
        );
        Ok(())
    }

    /// Writes the block index and merges this shard's statistics.
    ///
    /// Returns the number of k-mers written to the shard.
    pub fn finish(mut self) -> Result<u64> {
        self.data.flush()?;
        let layout = self.parent.layout;
        self.index
            .write(block_index_path(&self.parent.dir, self.shard, layout.num_files_bits))?;

        self.parent.histogram.lock().insert(&self.histogram);
        if let Some(done) = self.parent.finished.lock().get_mut(self.shard as usize) {
            *done = true;
        }

        log::debug!(
            "finished shard {}: {} k-mers in {} bytes",
            self.shard,
            self.num_kmers,
            self.position
        );
        Ok(self.num_kmers)
    }
}

/// Writes k-mers given in ascending order, one block at a time.
pub struct StreamWriter<'a> {
    parent: &'a DatabaseWriter,
    shard: Option<ShardWriter<'a>>,

    /// Prefix of the block being buffered
    prefix: u64,
    suffixes: Vec<u128>,
    values: Vec<u64>,
    labels: Vec<u64>,

    last: Option<Kmer>,
}
impl StreamWriter<'_> {
    /// Adds one k-mer; k-mers must arrive in ascending order.
    pub fn add_mer(&mut self, kmer: Kmer, value: u64, label: u64) -> Result<()> {
        if let Some(last) = self.last {
            if kmer < last || (kmer == last && !self.parent.multiset) {
                let size = self.parent.size;
                return Err(WriteError::UnsortedKmers {
                    previous: last.as_string(size),
                    current: kmer.as_string(size),
                }
                .into());
            }
        }
        self.last = Some(kmer);

        let layout = self.parent.layout;
        let prefix = layout.prefix_of(kmer);
        if prefix != self.prefix {
            self.flush_block()?;
            self.prefix = prefix;
        }

        self.suffixes.push(layout.suffix_of(kmer));
        self.values.push(value);
        self.labels.push(label);
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.suffixes.is_empty() {
            return Ok(());
        }
        let file = self.parent.layout.file_of_prefix(self.prefix);
        let reopen = self.shard.as_ref().map_or(true, |s| s.shard() != file);
        if reopen {
            if let Some(shard) = self.shard.take() {
                shard.finish()?;
            }
            self.shard = Some(self.parent.shard(file)?);
        }
        if let Some(shard) = self.shard.as_mut() {
            let labels: &[u64] = if self.parent.label_bits > 0 {
                &self.labels
            } else {
                &[]
            };
            shard.add_block(self.prefix, &self.suffixes, &self.values, labels)?;
        }
        self.suffixes.clear();
        self.values.clear();
        self.labels.clear();
        Ok(())
    }

    /// Flushes the last block and closes the open shard.
    pub fn finish(mut self) -> Result<()> {
        self.flush_block()?;
        if let Some(shard) = self.shard.take() {
            shard.finish()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{master_index_path, shard_name};

    fn size(k: usize) -> KmerSize {
        KmerSize::new(k).unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WriterBuilder::default()
            .build(dir.path().join("db"), size(21))
            .unwrap();
        assert_eq!(writer.layout().prefix_size, 12);
        assert_eq!(writer.label_bits(), 0);
        assert!(!writer.is_multiset());
        assert!(dir.path().join("db").is_dir());
    }

    #[test]
    fn test_initialize_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = WriterBuilder::default()
            .prefix_size(14)
            .build(dir.path(), size(21))
            .unwrap();
        assert!(writer.initialize(14).is_ok());
        assert!(writer.initialize(14).is_ok());
        assert!(matches!(
            writer.initialize(16),
            Err(crate::Error::WriteError(WriteError::PrefixSizeChanged { .. }))
        ));
    }

    #[test]
    fn test_invalid_label_bits() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WriterBuilder::default()
            .label_bits(60)
            .build(dir.path(), size(21))
            .is_err());
    }

    #[test]
    fn test_saturated_values_in_histogram() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WriterBuilder::default().build(dir.path(), size(8)).unwrap();
        let mut stream = writer.stream();
        stream.add_mer(crate::Kmer::new(1), u64::MAX, 0).unwrap();
        stream.add_mer(crate::Kmer::new(2), 2, 0).unwrap();
        stream.finish().unwrap();
        let histogram = writer.finish().unwrap();
        assert_eq!(histogram.num_distinct(), 2);
        assert_eq!(histogram.num_total(), u64::MAX);
        assert_eq!(histogram.occurrences_of(u64::MAX), 1);
    }

    #[test]
    fn test_finish_writes_every_shard() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WriterBuilder::default().build(dir.path(), size(8)).unwrap();
        let histogram = writer.finish().unwrap();
        assert!(histogram.is_empty());
        assert!(master_index_path(dir.path()).is_file());
        for shard in 0..64 {
            let name = shard_name(shard, 6);
            assert!(dir.path().join(format!("{name}.merylData")).is_file());
            assert!(dir.path().join(format!("{name}.merylIndex")).is_file());
        }
    }

    #[test]
    fn test_shard_rejects_foreign_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WriterBuilder::default().build(dir.path(), size(8)).unwrap();
        let mut shard = writer.shard(0).unwrap();
        // prefix 0b1_000000 belongs to shard 1
        assert!(shard.add_block(64, &[1], &[1], &[]).is_err());
        assert!(shard.add_block(3, &[2, 1], &[1, 1], &[]).is_err());
        assert!(shard.add_block(3, &[1, 2], &[1, 1], &[]).is_ok());
        assert_eq!(shard.finish().unwrap(), 2);
        assert!(writer.shard(64).is_err());
    }

    #[test]
    fn test_stream_rejects_unsorted() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WriterBuilder::default().build(dir.path(), size(4)).unwrap();
        let mut stream = writer.stream();
        stream.add_mer(Kmer::new(5), 1, 0).unwrap();
        assert!(stream.add_mer(Kmer::new(5), 1, 0).is_err());
        assert!(stream.add_mer(Kmer::new(4), 1, 0).is_err());
        stream.add_mer(Kmer::new(9), 1, 0).unwrap();
        stream.finish().unwrap();

        let histogram = writer.finish().unwrap();
        assert_eq!(histogram.num_distinct(), 2);
    }

    #[test]
    fn test_stream_multiset_allows_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WriterBuilder::default()
            .multiset(true)
            .build(dir.path(), size(4))
            .unwrap();
        let mut stream = writer.stream();
        stream.add_mer(Kmer::new(5), 1, 0).unwrap();
        stream.add_mer(Kmer::new(5), 3, 0).unwrap();
        stream.finish().unwrap();
        assert_eq!(writer.finish().unwrap().num_total(), 4);
    }
}
