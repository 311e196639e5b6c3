use super::ExactLookup;
use crate::{bits::PackedArray, error::LookupError, kmer::KmerIter, Kmer, Result};

/// Where a k-mer occurs: the ordinal of its sequence and the 0-based start
/// of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub seq_id: u32,
    pub offset: u32,
}
impl Position {
    /// Fails if either coordinate needs more than 32 bits.
    pub fn new(seq_id: usize, offset: usize) -> Result<Self> {
        match (u32::try_from(seq_id), u32::try_from(offset)) {
            (Ok(seq_id), Ok(offset)) => Ok(Self { seq_id, offset }),
            _ => Err(LookupError::PositionOverflow { seq_id, offset }.into()),
        }
    }

    fn pack(self) -> u64 {
        (u64::from(self.seq_id) << 32) | u64::from(self.offset)
    }

    fn unpack(packed: u64) -> Self {
        Self {
            seq_id: (packed >> 32) as u32,
            offset: packed as u32,
        }
    }
}

impl ExactLookup {
    /// Records where every stored k-mer occurs in `sequences`.
    ///
    /// Each item is one sequence; its ordinal is the sequence id. Windows are
    /// matched on their canonical k-mer. The iterator is walked twice, once
    /// to size the lists and once to fill them.
    ///
    /// Fails if a sequence ordinal or offset does not fit in 32 bits; the
    /// previously loaded positions are kept in that case.
    pub fn load_positions<'s, I>(&mut self, sequences: I) -> Result<()>
    where
        I: IntoIterator<Item = &'s [u8]>,
        I::IntoIter: Clone,
    {
        let sequences = sequences.into_iter();
        let n_slots = self.n_loaded as usize;

        let mut counts = vec![0u64; n_slots];
        for seq in sequences.clone() {
            for window in KmerIter::new(seq, self.size) {
                if let Some(slot) = self.index(window.canonical()) {
                    counts[slot as usize] += 1;
                }
            }
        }

        let mut position_bgn = Vec::with_capacity(n_slots + 1);
        let mut total = 0u64;
        position_bgn.push(0);
        for count in &counts {
            total += count;
            position_bgn.push(total);
        }

        let mut positions = PackedArray::new(64, total as usize);
        let mut ends = position_bgn[..n_slots].to_vec();
        for (seq_id, seq) in sequences.enumerate() {
            for window in KmerIter::new(seq, self.size) {
                if let Some(slot) = self.index(window.canonical()) {
                    let position = Position::new(seq_id, window.position)?;
                    positions.set(ends[slot as usize] as usize, position.pack());
                    ends[slot as usize] += 1;
                }
            }
        }
        log::info!("loaded {total} positions for {n_slots} k-mers");

        self.position_bgn = position_bgn;
        self.positions = positions;
        Ok(())
    }

    #[must_use]
    pub fn has_positions(&self) -> bool {
        !self.position_bgn.is_empty()
    }

    /// Positions of `kmer` in sequence order; empty if the k-mer is not
    /// stored or no positions were loaded.
    #[must_use]
    pub fn positions(&self, kmer: Kmer) -> Vec<Position> {
        let canonical = kmer.canonical(self.size);
        let Some(slot) = self.index(canonical) else {
            return Vec::new();
        };
        let slot = slot as usize;
        match (self.position_bgn.get(slot), self.position_bgn.get(slot + 1)) {
            (Some(&bgn), Some(&end)) => (bgn..end)
                .map(|idx| Position::unpack(self.positions.get(idx as usize)))
                .collect(),
            _ => Vec::new(),
        }
    }
}
