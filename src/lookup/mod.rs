//! In-memory exact membership and value lookup over a database.
//!
//! The table splits each k-mer into a `prefix_bits` bucket index and a
//! `suffix_bits` tag. Buckets are ranges of a packed tag array, sorted so a
//! query is a short binary search followed by a linear scan. The split is
//! chosen from the database histogram to fit a memory budget.

mod positions;

use std::path::{Path, PathBuf};

pub use positions::Position;

use crate::{
    bits::{bit_len, PackedArray},
    db::DatabaseReader,
    error::LookupError,
    Kmer, KmerSize, Result,
};

/// Bits of each bucket start pointer
const POINTER_BITS: u64 = 64;

/// Below this many candidates the search turns linear
const LINEAR_SCAN: usize = 8;

/// How many prefix widths past the smallest table are considered for speed
const EXTRA_PREFIX_BITS: u32 = 4;

/// Options for building an [`ExactLookup`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookupConfig {
    /// Memory budget in GiB; 0 means no limit
    pub max_memory_gb: f64,

    /// Smallest value to load; 0 is treated as 1
    pub min_value: u64,

    /// Largest value to load; `u64::MAX` means the largest in the database
    pub max_value: u64,
}
impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            max_memory_gb: 0.0,
            min_value: 0,
            max_value: u64::MAX,
        }
    }
}
impl LookupConfig {
    /// The budget in bits
    #[must_use]
    pub fn budget_bits(&self) -> u64 {
        if self.max_memory_gb <= 0.0 {
            u64::MAX
        } else {
            (self.max_memory_gb * (1u64 << 33) as f64) as u64
        }
    }
}

/// The table shape picked by [`ExactLookup::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupGeometry {
    pub prefix_bits: u32,
    pub suffix_bits: u32,
    pub value_bits: u32,

    /// Number of k-mers that will be stored
    pub n_suffix: u64,

    /// Estimated table size
    pub bits: u64,
}

/// Packed suffix tags up to 128 bits wide.
#[derive(Debug, Clone, Default)]
struct TagArray {
    hi: PackedArray,
    lo: PackedArray,
}
impl TagArray {
    fn new(width: u32, len: usize) -> Self {
        let width = u64::from(width);
        let (hi, lo) = if width > 64 { (width - 64, 64) } else { (0, width) };
        Self {
            hi: PackedArray::new(hi, len),
            lo: PackedArray::new(lo, len),
        }
    }

    #[inline]
    fn get(&self, idx: usize) -> u128 {
        (u128::from(self.hi.get(idx)) << 64) | u128::from(self.lo.get(idx))
    }

    fn set(&mut self, idx: usize, value: u128) {
        self.hi.set(idx, (value >> 64) as u64);
        self.lo.set(idx, value as u64);
    }

    fn size_in_bits(&self) -> u64 {
        self.hi.size_in_bits() + self.lo.size_in_bits()
    }
}

/// Exact k-mer lookup table.
///
/// Build with [`new`](Self::new), [`configure`](Self::configure) and
/// [`load`](Self::load); afterwards all queries take `&self` and the table
/// can be shared between threads.
#[derive(Debug, Clone)]
pub struct ExactLookup {
    dir: PathBuf,
    size: KmerSize,

    min_value: u64,
    max_value: u64,
    value_offset: u64,
    value_bits: u32,

    /// K-mers in the value range, from the histogram
    n_suffix: u64,

    geometry: Option<LookupGeometry>,

    /// Start of each bucket in the tag array; one extra entry marks the end
    bucket_bgn: Vec<u64>,
    tags: TagArray,
    values: PackedArray,
    n_loaded: u64,

    position_bgn: Vec<u64>,
    positions: PackedArray,
}
impl ExactLookup {
    /// Prepares an empty table for the database in `dir`.
    ///
    /// Reads the database histogram to resolve the value range and count
    /// the k-mers that will be stored.
    pub fn new<P: AsRef<Path>>(dir: P, size: KmerSize, config: LookupConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut reader = DatabaseReader::open_unchecked(&dir)?;
        if reader.kmer_size() != size {
            return Err(LookupError::IncompatibleKmerSize {
                expected: size.k(),
                found: reader.kmer_size().k(),
            }
            .into());
        }
        let histogram = reader.load_statistics();

        let min_value = config.min_value.max(1);
        let max_value = if config.max_value == u64::MAX {
            histogram.max_value().unwrap_or(0)
        } else {
            config.max_value
        };

        let value_bits = if max_value > min_value {
            bit_len(max_value - min_value + 1) as u32
        } else {
            0
        };

        let n_suffix: u64 = histogram
            .iter()
            .filter(|&(value, _)| min_value <= value && value <= max_value)
            .map(|(_, occurrences)| occurrences)
            .sum();

        Ok(Self {
            dir,
            size,
            min_value,
            max_value,
            value_offset: min_value - 1,
            value_bits,
            n_suffix,
            geometry: None,
            bucket_bgn: Vec::new(),
            tags: TagArray::default(),
            values: PackedArray::default(),
            n_loaded: 0,
            position_bgn: Vec::new(),
            positions: PackedArray::default(),
        })
    }

    /// Space in bits of a table with `prefix_bits` bucket bits
    fn table_bits(&self, prefix_bits: u32) -> u64 {
        let kmer_bits = u64::from(self.size.bits());
        let pb = u64::from(prefix_bits);
        1u64.checked_shl(prefix_bits)
            .map_or(u64::MAX, |n| n.saturating_mul(POINTER_BITS))
            .saturating_add(self.n_suffix.saturating_mul(kmer_bits - pb))
            .saturating_add(self.n_suffix.saturating_mul(u64::from(self.value_bits)))
    }

    /// Picks the table shape for the budget in `config`.
    pub fn configure(&mut self, config: &LookupConfig) -> Result<LookupGeometry> {
        self.configure_with_budget_bits(config.budget_bits())
    }

    /// Picks the table shape for a budget given in bits.
    ///
    /// The smallest table is found first; the chosen shape is the largest
    /// prefix within a few bits of it that still fits the budget, since
    /// sparser buckets search faster.
    pub fn configure_with_budget_bits(&mut self, budget: u64) -> Result<LookupGeometry> {
        let kmer_bits = self.size.bits();
        let pb_max = (bit_len(self.n_suffix) as u32 + 1).min(kmer_bits);

        let mut pb_min = 0;
        let mut min_space = u64::MAX;
        let mut chosen: Option<(u32, u64)> = None;

        for pb in 0..pb_max {
            let space = self.table_bits(pb);
            if space < min_space {
                pb_min = pb;
                min_space = space;
            }
            if space < budget && pb < pb_min + EXTRA_PREFIX_BITS {
                chosen = Some((pb, space));
            }
        }

        for pb in pb_min.saturating_sub(EXTRA_PREFIX_BITS)..pb_max {
            log::debug!(
                "{pb:>2} {:>14} {:>16}{}",
                1u128 << pb,
                self.table_bits(pb),
                if pb == pb_min { " (smallest)" } else { "" }
            );
        }

        let Some((prefix_bits, bits)) = chosen else {
            return Err(LookupError::InsufficientMemory {
                required: min_space,
                budget,
            }
            .into());
        };

        let geometry = LookupGeometry {
            prefix_bits,
            suffix_bits: kmer_bits - prefix_bits,
            value_bits: self.value_bits,
            n_suffix: self.n_suffix,
            bits,
        };
        log::info!(
            "lookup for {} {}-mers: {} prefix bits, {} suffix bits, {} value bits, {:.3} GB",
            geometry.n_suffix,
            self.size.k(),
            geometry.prefix_bits,
            geometry.suffix_bits,
            geometry.value_bits,
            bits as f64 / (1u64 << 33) as f64
        );
        self.geometry = Some(geometry);
        Ok(geometry)
    }

    fn in_range(&self, value: u64) -> bool {
        self.min_value <= value && value <= self.max_value
    }

    /// Reads the database into the table.
    pub fn load(&mut self) -> Result<()> {
        let geometry = self.geometry.ok_or(LookupError::NotConfigured)?;
        let n_prefix = 1usize << geometry.prefix_bits;
        let suffix_bits = geometry.suffix_bits;

        // count k-mers per bucket
        let mut lengths = vec![0u64; n_prefix];
        let mut reader = DatabaseReader::open(&self.dir, self.size)?;
        let (mut too_low, mut too_high) = (0u64, 0u64);
        while reader.next_mer()? {
            let value = reader.value();
            if value < self.min_value {
                too_low += 1;
            } else if value > self.max_value {
                too_high += 1;
            } else {
                // reader k-mers are masked to k bases, so the prefix fits
                lengths[reader.kmer().prefix(suffix_bits) as usize] += 1;
            }
        }

        // allocate
        let mut bucket_bgn = Vec::with_capacity(n_prefix + 1);
        let mut total = 0u64;
        bucket_bgn.push(0);
        for len in &lengths {
            total += len;
            bucket_bgn.push(total);
        }
        self.tags = TagArray::new(suffix_bits, total as usize);
        self.values = PackedArray::new(u64::from(self.value_bits), total as usize);
        log::debug!(
            "loading {total} k-mers, skipping {too_low} below and {too_high} above the value range"
        );

        // fill buckets in k-mer order, which keeps each bucket sorted
        let mut ends: Vec<u64> = bucket_bgn[..n_prefix].to_vec();
        reader.rewind();
        while reader.next_mer()? {
            let value = reader.value();
            if !self.in_range(value) {
                continue;
            }
            let kmer = reader.kmer();
            let prefix = kmer.prefix(suffix_bits) as usize;
            let slot = ends[prefix];
            if slot >= bucket_bgn[prefix + 1] {
                return Err(LookupError::BucketOverflow {
                    prefix: prefix as u64,
                }
                .into());
            }
            self.tags.set(slot as usize, kmer.suffix(suffix_bits));
            self.values.set(slot as usize, value - self.value_offset);
            ends[prefix] += 1;
        }

        self.bucket_bgn = bucket_bgn;
        self.n_loaded = total;
        Ok(())
    }

    /// Slot of `kmer` in the tag array
    fn find(&self, kmer: Kmer) -> Option<usize> {
        let geometry = self.geometry?;
        if kmer.0 > self.size.mask() {
            return None;
        }
        let prefix = usize::try_from(kmer.prefix(geometry.suffix_bits)).ok()?;
        let suffix = kmer.suffix(geometry.suffix_bits);

        let mut bgn = *self.bucket_bgn.get(prefix)? as usize;
        let mut end = *self.bucket_bgn.get(prefix + 1)? as usize;

        while bgn + LINEAR_SCAN < end {
            let mid = bgn + (end - bgn) / 2;
            let tag = self.tags.get(mid);
            if tag == suffix {
                return Some(mid);
            }
            if suffix < tag {
                end = mid;
            } else {
                bgn = mid + 1;
            }
        }
        (bgn..end).find(|&idx| self.tags.get(idx) == suffix)
    }

    fn stored_value(&self, slot: usize) -> u64 {
        if self.value_bits == 0 {
            self.min_value
        } else {
            self.values.get(slot) + self.value_offset
        }
    }

    #[must_use]
    pub fn exists(&self, kmer: Kmer) -> bool {
        self.find(kmer).is_some()
    }

    /// The value of `kmer`, if stored
    #[must_use]
    pub fn exists_value(&self, kmer: Kmer) -> Option<u64> {
        self.find(kmer).map(|slot| self.stored_value(slot))
    }

    /// The value of `kmer`, or 0 if it is not stored
    #[must_use]
    pub fn value(&self, kmer: Kmer) -> u64 {
        self.exists_value(kmer).unwrap_or(0)
    }

    /// Global slot of a stored k-mer
    #[must_use]
    pub fn index(&self, kmer: Kmer) -> Option<u64> {
        self.find(kmer).map(|slot| slot as u64)
    }

    #[must_use]
    pub fn kmer_size(&self) -> KmerSize {
        self.size
    }

    #[must_use]
    pub fn geometry(&self) -> Option<LookupGeometry> {
        self.geometry
    }

    #[must_use]
    pub fn prefix_bits(&self) -> u32 {
        self.geometry.map_or(0, |g| g.prefix_bits)
    }

    #[must_use]
    pub fn suffix_bits(&self) -> u32 {
        self.geometry.map_or(0, |g| g.suffix_bits)
    }

    #[must_use]
    pub fn value_bits(&self) -> u32 {
        self.value_bits
    }

    /// Number of stored k-mers
    #[must_use]
    pub fn len(&self) -> u64 {
        self.n_loaded
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_loaded == 0
    }

    /// Memory used by the loaded table
    #[must_use]
    pub fn memory_bits(&self) -> u64 {
        self.bucket_bgn.len() as u64 * POINTER_BITS
            + self.tags.size_in_bits()
            + self.values.size_in_bits()
            + self.position_bgn.len() as u64 * POINTER_BITS
            + self.positions.size_in_bits()
    }
}
