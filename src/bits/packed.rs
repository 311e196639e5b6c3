use super::low_mask;

/// A fixed-length array of `width`-bit unsigned integers packed into words.
///
/// Values are stored least-significant bit first and may span two words.
/// The array is sized once at construction and never grows.
#[derive(Debug, Clone, Default)]
pub struct PackedArray {
    width: u64,
    len: usize,
    words: Vec<u64>,
}
impl PackedArray {
    /// Creates a zero-filled array of `len` values, `width` (0..=64) bits each.
    ///
    /// A width of zero stores nothing; every value reads back as zero.
    #[must_use]
    pub fn new(width: u64, len: usize) -> Self {
        debug_assert!(width <= 64);
        let n_words = (width * len as u64).div_ceil(64) as usize;
        Self {
            width,
            len,
            words: vec![0; n_words],
        }
    }

    /// Bits the array would allocate for `len` values of `width` bits.
    #[must_use]
    pub fn bits_for(width: u64, len: u64) -> u64 {
        (width * len).div_ceil(64) * 64
    }

    #[must_use]
    pub fn width(&self) -> u64 {
        self.width
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated size in bits
    #[must_use]
    pub fn size_in_bits(&self) -> u64 {
        self.words.len() as u64 * 64
    }

    /// Returns the value at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    #[inline]
    #[must_use]
    pub fn get(&self, idx: usize) -> u64 {
        assert!(idx < self.len, "index {idx} out of bounds ({})", self.len);
        if self.width == 0 {
            return 0;
        }
        let bit = idx as u64 * self.width;
        let w = (bit / 64) as usize;
        let o = bit % 64;

        if o + self.width <= 64 {
            (self.words[w] >> o) & low_mask(self.width)
        } else {
            let lo_bits = 64 - o;
            let lo = self.words[w] >> o;
            let hi = self.words[w + 1] & low_mask(self.width - lo_bits);
            lo | (hi << lo_bits)
        }
    }

    /// Stores the low `width` bits of `value` at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    #[inline]
    pub fn set(&mut self, idx: usize, value: u64) {
        assert!(idx < self.len, "index {idx} out of bounds ({})", self.len);
        if self.width == 0 {
            return;
        }
        let value = value & low_mask(self.width);
        let bit = idx as u64 * self.width;
        let w = (bit / 64) as usize;
        let o = bit % 64;

        if o + self.width <= 64 {
            let mask = low_mask(self.width) << o;
            self.words[w] = (self.words[w] & !mask) | (value << o);
        } else {
            let lo_bits = 64 - o;
            let hi_bits = self.width - lo_bits;
            self.words[w] = (self.words[w] & low_mask(o)) | (value << o);
            self.words[w + 1] = (self.words[w + 1] & !low_mask(hi_bits)) | (value >> lo_bits);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len).map(|idx| self.get(idx))
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_widths() {
        let mut rng = SmallRng::seed_from_u64(42);
        for width in [1u64, 3, 7, 13, 31, 32, 33, 63, 64] {
            let values: Vec<u64> = (0..257)
                .map(|_| rng.random::<u64>() & low_mask(width))
                .collect();
            let mut array = PackedArray::new(width, values.len());
            for (idx, &v) in values.iter().enumerate() {
                array.set(idx, v);
            }
            assert_eq!(array.iter().collect::<Vec<_>>(), values, "width {width}");
        }
    }

    #[test]
    fn test_overwrite_neighbors_untouched() {
        let mut array = PackedArray::new(13, 10);
        for idx in 0..10 {
            array.set(idx, 0x1fff);
        }
        array.set(4, 0);
        assert_eq!(array.get(3), 0x1fff);
        assert_eq!(array.get(4), 0);
        assert_eq!(array.get(5), 0x1fff);
    }

    #[test]
    fn test_zero_width() {
        let mut array = PackedArray::new(0, 100);
        array.set(50, 99);
        assert_eq!(array.get(50), 0);
        assert_eq!(array.size_in_bits(), 0);
        assert_eq!(array.len(), 100);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_out_of_bounds() {
        let array = PackedArray::new(8, 4);
        let _ = array.get(4);
    }
}
