//! Frequency-of-frequencies tables over k-mer values.

mod ploidy;

use std::collections::BTreeMap;
use std::io::Write;

pub use ploidy::PloidyPeaks;

use crate::{bits::StuffedBits, KmerSize, Result};

/// Values below this go in the dense table by default.
pub const DEFAULT_HIST_MAX: u64 = 32 * 1024 * 1024;

/// A mapping from k-mer value to the number of distinct k-mers with that
/// value.
///
/// Small values live in a dense table that grows on demand up to
/// `hist_max` entries; larger values go to a sparse ordered map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    hist_max: u64,
    num_unique: u64,
    num_distinct: u64,
    num_total: u64,
    small: Vec<u64>,
    big: BTreeMap<u64, u64>,
}
impl Default for Histogram {
    fn default() -> Self {
        Self::new(DEFAULT_HIST_MAX)
    }
}
impl Histogram {
    #[must_use]
    pub fn new(hist_max: u64) -> Self {
        Self {
            hist_max,
            num_unique: 0,
            num_distinct: 0,
            num_total: 0,
            small: Vec::new(),
            big: BTreeMap::new(),
        }
    }

    /// Records `count` distinct k-mers with value `value`.
    pub fn add_value(&mut self, value: u64, count: u64) {
        if count == 0 {
            return;
        }
        // totals saturate like the values they sum
        if value == 1 {
            self.num_unique = self.num_unique.saturating_add(count);
        }
        self.num_distinct = self.num_distinct.saturating_add(count);
        self.num_total = self
            .num_total
            .saturating_add(value.saturating_mul(count));

        if value < self.hist_max {
            let idx = value as usize;
            if idx >= self.small.len() {
                self.small.resize(idx + 1, 0);
            }
            self.small[idx] = self.small[idx].saturating_add(count);
        } else {
            let slot = self.big.entry(value).or_default();
            *slot = slot.saturating_add(count);
        }
    }

    /// Adds every entry of `other` to this histogram.
    pub fn insert(&mut self, other: &Self) {
        for (value, occurrences) in other.iter() {
            self.add_value(value, occurrences);
        }
    }

    /// Number of k-mers seen exactly once
    #[must_use]
    pub fn num_unique(&self) -> u64 {
        self.num_unique
    }

    /// Number of distinct k-mers
    #[must_use]
    pub fn num_distinct(&self) -> u64 {
        self.num_distinct
    }

    /// Sum of all values
    #[must_use]
    pub fn num_total(&self) -> u64 {
        self.num_total
    }

    /// Number of distinct values present
    #[must_use]
    pub fn num_values(&self) -> u64 {
        self.small.iter().filter(|&&o| o > 0).count() as u64 + self.big.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_distinct == 0
    }

    /// Largest value with a non-zero count
    #[must_use]
    pub fn max_value(&self) -> Option<u64> {
        self.iter().last().map(|(value, _)| value)
    }

    /// Number of distinct k-mers with exactly `value`
    #[must_use]
    pub fn occurrences_of(&self, value: u64) -> u64 {
        if value < self.hist_max {
            self.small.get(value as usize).copied().unwrap_or(0)
        } else {
            self.big.get(&value).copied().unwrap_or(0)
        }
    }

    /// Iterates `(value, occurrences)` in ascending value order, skipping
    /// empty cells.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.small
            .iter()
            .enumerate()
            .filter(|(_, &o)| o > 0)
            .map(|(v, &o)| (v as u64, o))
            .chain(self.big.iter().map(|(&v, &o)| (v, o)))
    }

    /// Materializes the non-empty cells for indexed access.
    #[must_use]
    pub fn entries(&self) -> HistogramEntries {
        let (values, occurrences) = self.iter().unzip();
        HistogramEntries {
            values,
            occurrences,
        }
    }

    /// Appends the histogram to a bit stream.
    pub fn dump(&self, bits: &mut StuffedBits) {
        bits.set_binary(64, self.num_unique);
        bits.set_binary(64, self.num_distinct);
        bits.set_binary(64, self.num_total);
        bits.set_binary(64, self.num_values());
        for (value, occurrences) in self.iter() {
            bits.set_binary(64, value);
            bits.set_binary(64, occurrences);
        }
    }

    /// Reads a histogram written by a master index of `version` (1..=4).
    ///
    /// Versions 1 and 2 stored a dense table of occurrences indexed by value;
    /// later versions store `(value, occurrences)` pairs. The summary counts
    /// are rebuilt from the entries so they always agree with them.
    pub fn load(bits: &mut StuffedBits, version: u32) -> Self {
        let mut histogram = Self::default();

        let stored_unique = bits.get_binary(64);
        let stored_distinct = bits.get_binary(64);
        let stored_total = bits.get_binary(64);

        if version < 3 {
            let hist_max = bits.get_binary(32);
            let _num_big = bits.get_binary(32);
            for value in 0..hist_max {
                let occurrences = bits.get_binary(64);
                histogram.add_value(value, occurrences);
            }
        } else {
            let num_values = bits.get_binary(64);
            for _ in 0..num_values {
                let value = bits.get_binary(64);
                let occurrences = bits.get_binary(64);
                histogram.add_value(value, occurrences);
            }
        }

        if (stored_unique, stored_distinct, stored_total)
            != (histogram.num_unique, histogram.num_distinct, histogram.num_total)
        {
            log::warn!(
                "histogram summary disagrees with its entries (stored {stored_distinct} distinct / {stored_total} total, found {} / {})",
                histogram.num_distinct,
                histogram.num_total
            );
        }
        histogram
    }

    /// Writes `value<TAB>occurrences` lines.
    pub fn report_histogram<W: Write>(&self, writer: &mut W) -> Result<()> {
        for (value, occurrences) in self.iter() {
            writeln!(writer, "{value}\t{occurrences}")?;
        }
        Ok(())
    }

    /// Writes the summary counts and the cumulative distribution table.
    pub fn report_statistics<W: Write>(&self, writer: &mut W, size: KmerSize) -> Result<()> {
        let universe = size.universe();
        let missing = universe - self.num_distinct as f64;
        let k = size.k();

        writeln!(writer, "Number of {k}-mers that are:")?;
        writeln!(
            writer,
            "  unique   {:>20}  (exactly one instance of the kmer is in the input)",
            self.num_unique
        )?;
        writeln!(
            writer,
            "  distinct {:>20}  (non-redundant kmer sequences in the input)",
            self.num_distinct
        )?;
        writeln!(
            writer,
            "  present  {:>20}  (total number of kmers in the input)",
            self.num_total
        )?;
        writeln!(
            writer,
            "  missing  {:>20.0}  (non-redundant kmer sequences not in the input)",
            missing
        )?;
        writeln!(writer)?;
        writeln!(writer, "             number of   cumulative   cumulative     presence")?;
        writeln!(writer, "              distinct     fraction     fraction   in dataset")?;
        writeln!(writer, "frequency        kmers     distinct        total       (1e-6)")?;
        writeln!(writer, "--------- ------------ ------------ ------------ ------------")?;

        let distinct = self.num_distinct as f64;
        let total = self.num_total as f64;
        let mut sum_distinct = 0u64;
        let mut sum_total = 0u64;
        for (value, occurrences) in self.iter() {
            sum_distinct = sum_distinct.saturating_add(occurrences);
            sum_total = sum_total.saturating_add(occurrences.saturating_mul(value));
            writeln!(
                writer,
                "{:>9} {:>12} {:>12.4} {:>12.4} {:>12.6}",
                value,
                occurrences,
                sum_distinct as f64 / distinct,
                sum_total as f64 / total,
                value as f64 / total * 1_000_000.0
            )?;
        }
        Ok(())
    }

    /// Locates the noise trough and coverage peaks.
    #[must_use]
    pub fn ploidy_peaks(&self) -> PloidyPeaks {
        PloidyPeaks::compute(self)
    }
}

/// The non-empty cells of a [`Histogram`], addressable by position.
#[derive(Debug, Clone, Default)]
pub struct HistogramEntries {
    values: Vec<u64>,
    occurrences: Vec<u64>,
}
impl HistogramEntries {
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> u64 {
        self.values[idx]
    }

    #[must_use]
    pub fn occurrences(&self, idx: usize) -> u64 {
        self.occurrences[idx]
    }
}
