//! In-memory k-mer counting.

use std::collections::BTreeMap;
use std::path::Path;
use std::thread;

use crate::{
    db::{resolve_threads, DatabaseWriter, Layout, WriterBuilder},
    Histogram, Kmer, KmerIter, KmerSize, Result,
};

/// Collects canonical k-mer occurrences and writes them as a database.
///
/// Occurrences are buffered unsorted; sorting and collapsing happen per
/// shard when the database is written.
#[derive(Debug, Clone)]
pub struct KmerCounter {
    size: KmerSize,
    entries: Vec<(Kmer, u64)>,
}
impl KmerCounter {
    #[must_use]
    pub fn new(size: KmerSize) -> Self {
        Self {
            size,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn kmer_size(&self) -> KmerSize {
        self.size
    }

    /// Adds the canonical k-mer of every window of `seq`.
    ///
    /// Bases other than ACGT break the window.
    pub fn add_sequence(&mut self, seq: &[u8]) {
        self.entries
            .extend(KmerIter::new(seq, self.size).map(|w| (w.canonical(), 1)));
    }

    /// Adds `count` occurrences of `kmer` as given.
    pub fn add_kmer(&mut self, kmer: Kmer, count: u64) {
        if count > 0 {
            self.entries.push((kmer, count));
        }
    }

    /// Number of buffered occurrence records
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The collapsed counts
    #[must_use]
    pub fn counts(&self) -> BTreeMap<Kmer, u64> {
        let mut counts = BTreeMap::new();
        for &(kmer, count) in &self.entries {
            let value: &mut u64 = counts.entry(kmer).or_default();
            *value = value.saturating_add(count);
        }
        counts
    }

    /// Writes the counts to a new database at `dir`.
    ///
    /// Occurrences are bucketed by shard, then every shard is sorted,
    /// collapsed and written by one of `num_threads` threads (0 for all
    /// CPUs). Returns the histogram of the database.
    pub fn write_database<P: AsRef<Path>>(
        self,
        builder: WriterBuilder,
        dir: P,
        num_threads: usize,
    ) -> Result<Histogram> {
        let writer = builder.build(dir, self.size)?;
        let layout = writer.layout();
        let num_files = layout.num_files() as usize;

        let mut buckets: Vec<Vec<(Kmer, u64)>> = vec![Vec::new(); num_files];
        for (kmer, count) in self.entries {
            buckets[layout.file_of_kmer(kmer) as usize].push((kmer, count));
        }

        let num_threads = resolve_threads(num_threads);
        let shards_per_thread = num_files.div_ceil(num_threads).max(1);
        log::info!(
            "writing {}-mers in {num_files} shards with {num_threads} threads",
            self.size.k()
        );

        thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::new();
            for (chunk_idx, chunk) in buckets.chunks_mut(shards_per_thread).enumerate() {
                let writer = &writer;
                let handle = scope.spawn(move || -> Result<()> {
                    for (i, bucket) in chunk.iter_mut().enumerate() {
                        let shard = (chunk_idx * shards_per_thread + i) as u32;
                        write_shard(writer, layout, shard, bucket)?;
                    }
                    Ok(())
                });
                handles.push(handle);
            }

            for handle in handles {
                match handle.join() {
                    Ok(result) => result?,
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            Ok(())
        })?;

        writer.finish()
    }
}

/// Sorts, collapses and writes one shard's occurrences.
fn write_shard(
    writer: &DatabaseWriter,
    layout: Layout,
    shard: u32,
    bucket: &mut Vec<(Kmer, u64)>,
) -> Result<()> {
    bucket.sort_unstable_by_key(|&(kmer, _)| kmer);

    let mut out = writer.shard(shard)?;
    let mut prefix = None;
    let mut suffixes = Vec::new();
    let mut values: Vec<u64> = Vec::new();
    let mut last = None;

    for &(kmer, count) in bucket.iter() {
        if last == Some(kmer) {
            if let Some(value) = values.last_mut() {
                *value = value.saturating_add(count);
            }
            continue;
        }
        last = Some(kmer);

        let p = layout.prefix_of(kmer);
        if prefix != Some(p) {
            if let Some(prev) = prefix {
                out.add_block(prev, &suffixes, &values, &[])?;
                suffixes.clear();
                values.clear();
            }
            prefix = Some(p);
        }
        suffixes.push(layout.suffix_of(kmer));
        values.push(count);
    }
    if let Some(prev) = prefix {
        out.add_block(prev, &suffixes, &values, &[])?;
    }

    bucket.clear();
    bucket.shrink_to_fit();
    out.finish()?;
    Ok(())
}
