use super::{is_acgt, Kmer, KmerSize};

/// One complete window produced by [`KmerIter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmerWindow {
    /// 0-based offset of the first base of the window
    pub position: usize,
    pub forward: Kmer,
    pub reverse: Kmer,
}
impl KmerWindow {
    #[must_use]
    pub fn canonical(&self) -> Kmer {
        self.forward.min(self.reverse)
    }
}

/// Rolling forward and reverse-complement k-mers over a sequence.
///
/// Any byte other than A, C, G or T (either case) breaks the window; the
/// next k-mer is reported only after `k` valid bases have been seen again.
pub struct KmerIter<'a> {
    seq: &'a [u8],
    size: KmerSize,
    pos: usize,
    valid: usize,
    forward: Kmer,
    reverse: Kmer,
}
impl<'a> KmerIter<'a> {
    #[must_use]
    pub fn new(seq: &'a [u8], size: KmerSize) -> Self {
        Self {
            seq,
            size,
            pos: 0,
            valid: 0,
            forward: Kmer::default(),
            reverse: Kmer::default(),
        }
    }
}
impl Iterator for KmerIter<'_> {
    type Item = KmerWindow;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.seq.len() {
            let base = self.seq[self.pos];
            self.pos += 1;

            if !is_acgt(base) {
                self.valid = 0;
                continue;
            }

            self.forward = self.forward.add_r(base, self.size);
            self.reverse = self.reverse.add_l(base, self.size);
            self.valid += 1;

            if self.valid >= self.size.k() {
                return Some(KmerWindow {
                    position: self.pos - self.size.k(),
                    forward: self.forward,
                    reverse: self.reverse,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows() {
        let size = KmerSize::new(3).unwrap();
        let windows: Vec<_> = KmerIter::new(b"ACGTA", size).collect();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].position, 0);
        assert_eq!(windows[0].forward.as_string(size), "ACG");
        assert_eq!(windows[0].reverse.as_string(size), "CGT");
        assert_eq!(windows[2].forward.as_string(size), "GTA");
        assert_eq!(windows[2].canonical().as_string(size), "TAC");
    }

    #[test]
    fn test_resets_on_invalid_base() {
        let size = KmerSize::new(3).unwrap();
        let windows: Vec<_> = KmerIter::new(b"ACNGTAC", size).collect();
        let positions: Vec<_> = windows.iter().map(|w| w.position).collect();
        assert_eq!(positions, vec![3, 4]);
        assert_eq!(windows[0].forward.as_string(size), "GTA");
    }

    #[test]
    fn test_short_sequence() {
        let size = KmerSize::new(8).unwrap();
        assert_eq!(KmerIter::new(b"ACGT", size).count(), 0);
    }
}
