use std::ops::Range;
use std::thread;

use super::{DatabaseReader, KmerRecord};
use crate::{error::ReadError, Result};

/// Resolves a requested thread count: 0 means all CPUs, anything else is
/// capped at the CPU count.
pub(crate) fn resolve_threads(num_threads: usize) -> usize {
    if num_threads == 0 {
        num_cpus::get()
    } else {
        num_threads.min(num_cpus::get())
    }
}

/// Trait for readers that can process their shards in parallel
///
/// This is implemented by the **reader** not by the **processor**.
/// For the **processor**, see the [`ShardProcessor`] trait.
pub trait ParallelReader {
    fn process_parallel<P: ShardProcessor + Clone + 'static>(
        self,
        processor: P,
        num_threads: usize,
    ) -> Result<()>;

    /// Process a contiguous range of shards in parallel
    ///
    /// The shards are split into equal contiguous runs, one per thread. Each
    /// thread opens its own reader restricted to one shard at a time.
    ///
    /// # Arguments
    ///
    /// * `processor` - The processor to use for each record
    /// * `num_threads` - The number of threads to spawn (0 for all CPUs)
    /// * `range` - The range of shards to process
    fn process_parallel_range<P: ShardProcessor + Clone + 'static>(
        self,
        processor: P,
        num_threads: usize,
        range: Range<u32>,
    ) -> Result<()>;
}

/// Trait for types that process database records shard by shard.
///
/// This is implemented by the **processor** not by the **reader**.
/// For the **reader**, see the [`ParallelReader`] trait.
pub trait ShardProcessor: Send + Clone {
    /// Process a single record
    fn process_record(&mut self, record: &KmerRecord) -> Result<()>;

    /// Called when a thread finishes a shard
    #[allow(unused_variables)]
    fn on_shard_complete(&mut self, shard: u32) -> Result<()> {
        Ok(())
    }

    /// Set the thread ID for this processor
    #[allow(unused_variables)]
    fn set_tid(&mut self, tid: usize) {}

    /// Get the thread ID for this processor
    fn get_tid(&self) -> Option<usize> {
        None
    }
}

impl ParallelReader for DatabaseReader {
    fn process_parallel<P: ShardProcessor + Clone + 'static>(
        self,
        processor: P,
        num_threads: usize,
    ) -> Result<()> {
        let num_files = self.num_files();
        self.process_parallel_range(processor, num_threads, 0..num_files)
    }

    fn process_parallel_range<P: ShardProcessor + Clone + 'static>(
        self,
        processor: P,
        num_threads: usize,
        range: Range<u32>,
    ) -> Result<()> {
        let num_files = self.num_files();
        if range.end > num_files {
            return Err(ReadError::ShardOutOfRange {
                requested: range.end,
                max: num_files,
            }
            .into());
        }
        if range.start >= range.end {
            return Ok(());
        }

        let num_threads = resolve_threads(num_threads);
        let Range { start: first, end: last } = range;
        let shards_per_thread = (last - first).div_ceil(num_threads as u32);
        let dir = self.dir().to_path_buf();
        let size = self.kmer_size();

        let mut handles = Vec::new();
        for tid in 0..num_threads {
            let mut processor = processor.clone();
            let dir = dir.clone();
            processor.set_tid(tid);

            let handle = thread::spawn(move || -> Result<()> {
                let start = first + tid as u32 * shards_per_thread;
                let end = (start + shards_per_thread).min(last);
                if start >= end {
                    return Ok(());
                }

                let mut reader = DatabaseReader::open(&dir, size)?;
                for shard in start..end {
                    reader.enable_threads(shard)?;
                    while reader.next_mer()? {
                        processor.process_record(&reader.record())?;
                    }
                    processor.on_shard_complete(shard)?;
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
    }
}

#[cfg(test)]
mod testing {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::{db::WriterBuilder, Kmer, KmerSize};

    #[derive(Clone, Default)]
    struct TestProcessor {
        n_records: Arc<Mutex<usize>>,
        total: Arc<Mutex<u64>>,
        shards: Arc<Mutex<BTreeSet<u32>>>,
    }
    impl ShardProcessor for TestProcessor {
        fn process_record(&mut self, record: &KmerRecord) -> Result<()> {
            *self.n_records.lock() += 1;
            *self.total.lock() += record.value;
            Ok(())
        }

        fn on_shard_complete(&mut self, shard: u32) -> Result<()> {
            self.shards.lock().insert(shard);
            Ok(())
        }
    }

    fn build(dir: &std::path::Path) -> usize {
        let size = KmerSize::new(12).unwrap();
        let writer = WriterBuilder::default().build(dir, size).unwrap();
        let mut stream = writer.stream();
        let mut n = 0;
        for kmer in (0..(1u128 << 24)).step_by(4099) {
            stream.add_mer(Kmer::new(kmer), 2, 0).unwrap();
            n += 1;
        }
        stream.finish().unwrap();
        writer.finish().unwrap();
        n
    }

    #[test]
    fn test_parallel_processor() {
        let dir = tempfile::tempdir().unwrap();
        let n = build(dir.path());
        let reader = DatabaseReader::open_unchecked(dir.path()).unwrap();
        let processor = TestProcessor::default();
        reader.process_parallel(processor.clone(), 4).unwrap();
        assert_eq!(*processor.n_records.lock(), n);
        assert_eq!(*processor.total.lock(), 2 * n as u64);
        assert_eq!(processor.shards.lock().len(), 64);
    }

    #[test]
    fn test_parallel_processor_range() {
        let dir = tempfile::tempdir().unwrap();
        build(dir.path());
        let reader = DatabaseReader::open_unchecked(dir.path()).unwrap();
        let processor = TestProcessor::default();
        reader
            .process_parallel_range(processor.clone(), 0, 10..20)
            .unwrap();
        let shards: Vec<u32> = processor.shards.lock().iter().copied().collect();
        assert_eq!(shards, (10..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_parallel_processor_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        build(dir.path());
        let reader = DatabaseReader::open_unchecked(dir.path()).unwrap();
        assert!(reader
            .process_parallel_range(TestProcessor::default(), 0, 0..100)
            .is_err());
    }
}
