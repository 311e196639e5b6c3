//! Variable-length integer codes on top of the binary and unary primitives.

use super::{bit_len, StuffedBits, FIBONACCI, FIBONACCI_LEN};
use crate::error::{ReadError, Result};

impl StuffedBits {
    /// Reads an Elias-gamma code.
    ///
    /// Fails if the unary length prefix describes a value wider than 64 bits.
    pub fn get_elias_gamma(&mut self) -> Result<u64> {
        let position = self.position();
        let n = self.get_unary();
        check_width("Elias-gamma", n, position)?;
        Ok((1 << n) | self.get_binary(n))
    }

    /// Writes an Elias-gamma code: the bit length minus one in unary, then
    /// the value without its leading one bit.
    ///
    /// `value` must be positive.
    pub fn set_elias_gamma(&mut self, value: u64) -> u64 {
        debug_assert!(value > 0, "Elias-gamma cannot encode zero");
        let n = bit_len(value) - 1;
        self.set_unary(n) + self.set_binary(n, value)
    }

    /// Reads an Elias-delta code.
    pub fn get_elias_delta(&mut self) -> Result<u64> {
        let position = self.position();
        let n = self.get_elias_gamma()? - 1;
        check_width("Elias-delta", n, position)?;
        Ok((1 << n) | self.get_binary(n))
    }

    /// Writes an Elias-delta code: the bit length in Elias-gamma, then the
    /// value without its leading one bit.
    ///
    /// `value` must be positive.
    pub fn set_elias_delta(&mut self, value: u64) -> u64 {
        debug_assert!(value > 0, "Elias-delta cannot encode zero");
        let len = bit_len(value);
        self.set_elias_gamma(len) + self.set_binary(len - 1, value)
    }

    /// Reads a Zeckendorf (Fibonacci) code, stopping at the first pair of
    /// consecutive one bits.
    pub fn get_zeckendorf(&mut self) -> u64 {
        let mut value = 0u64;
        let mut previous = false;
        let mut idx = 1;

        loop {
            let bit = self.get_bit();
            if bit && previous {
                break;
            }
            if bit {
                value = value.wrapping_add(FIBONACCI[idx.min(FIBONACCI_LEN - 1)]);
            }
            previous = bit;
            idx += 1;
            if idx > FIBONACCI_LEN {
                break;
            }
        }
        value
    }

    /// Writes a Zeckendorf code.
    ///
    /// One bit per Fibonacci number from `FIBONACCI[1]` up to the largest
    /// one not exceeding `value`, lowest first, followed by a terminating one
    /// bit. `value` must be positive.
    pub fn set_zeckendorf(&mut self, value: u64) -> u64 {
        debug_assert!(value > 0, "Zeckendorf cannot encode zero");
        let (code, len) = zeckendorf_code(value);

        self.reserve(len);
        if len > 64 {
            self.put_binary(len - 64, (code >> 64) as u64);
            self.put_binary(64, code as u64);
        } else {
            self.put_binary(len, code as u64);
        }
        len
    }

    pub fn get_elias_gamma_array(&mut self, count: usize) -> Result<Vec<u64>> {
        (0..count).map(|_| self.get_elias_gamma()).collect()
    }

    pub fn set_elias_gamma_array(&mut self, values: &[u64]) -> u64 {
        values.iter().map(|&v| self.set_elias_gamma(v)).sum()
    }

    pub fn get_elias_delta_array(&mut self, count: usize) -> Result<Vec<u64>> {
        (0..count).map(|_| self.get_elias_delta()).collect()
    }

    pub fn set_elias_delta_array(&mut self, values: &[u64]) -> u64 {
        values.iter().map(|&v| self.set_elias_delta(v)).sum()
    }

    pub fn get_zeckendorf_array(&mut self, count: usize) -> Vec<u64> {
        (0..count).map(|_| self.get_zeckendorf()).collect()
    }

    pub fn set_zeckendorf_array(&mut self, values: &[u64]) -> u64 {
        values.iter().map(|&v| self.set_zeckendorf(v)).sum()
    }
}

fn check_width(code: &'static str, width: u64, position: u64) -> Result<()> {
    if width >= 64 {
        return Err(ReadError::InvalidCode {
            code,
            width,
            position,
        }
        .into());
    }
    Ok(())
}

/// Builds the Zeckendorf code of `value` as (bits, length), first emitted
/// bit in the most significant position.
fn zeckendorf_code(value: u64) -> (u128, u64) {
    let ff = FIBONACCI.iter().take_while(|&&f| f <= value).count();

    let mut used = [false; FIBONACCI_LEN];
    let mut remaining = value;
    for idx in (1..ff).rev() {
        if FIBONACCI[idx] <= remaining {
            used[idx] = true;
            remaining -= FIBONACCI[idx];
        }
    }

    let mut code = 0u128;
    for &bit in &used[1..ff] {
        code = (code << 1) | u128::from(bit);
    }
    code = (code << 1) | 1;

    (code, ff as u64)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn code_string(value: u64) -> String {
        let mut bits = StuffedBits::new();
        let len = bits.set_zeckendorf(value);
        bits.set_position(0);
        (0..len)
            .map(|_| if bits.get_bit() { '1' } else { '0' })
            .collect()
    }

    #[test]
    fn test_gamma_layout() {
        let mut bits = StuffedBits::new();
        // 5 = 101: two zeros, a one, then the low two bits
        assert_eq!(bits.set_elias_gamma(5), 5);
        bits.set_position(0);
        assert_eq!(bits.get_binary(5), 0b00101);
    }

    #[test]
    fn test_gamma_delta_small() {
        let mut bits = StuffedBits::new();
        for v in 1..=300u64 {
            bits.set_elias_gamma(v);
            bits.set_elias_delta(v);
        }
        bits.set_position(0);
        for v in 1..=300u64 {
            assert_eq!(bits.get_elias_gamma().unwrap(), v);
            assert_eq!(bits.get_elias_delta().unwrap(), v);
        }
    }

    #[test]
    fn test_gamma_delta_reject_wide_codes() {
        let mut bits = StuffedBits::new();
        bits.set_unary(64);
        bits.set_binary(64, 0);
        bits.set_position(0);
        assert!(matches!(
            bits.get_elias_gamma(),
            Err(crate::Error::ReadError(ReadError::InvalidCode { width: 64, .. }))
        ));

        // a gamma-coded length of 65 asks for a 65-bit delta value
        let mut bits = StuffedBits::new();
        bits.set_elias_gamma(65);
        bits.set_binary(64, 0);
        bits.set_binary(64, 0);
        bits.set_position(0);
        assert!(matches!(
            bits.get_elias_delta(),
            Err(crate::Error::ReadError(ReadError::InvalidCode { width: 64, .. }))
        ));
    }

    #[test]
    fn test_zeckendorf_codes() {
        assert_eq!(code_string(1), "11");
        assert_eq!(code_string(2), "011");
        assert_eq!(code_string(3), "0011");
        assert_eq!(code_string(4), "1011");
        assert_eq!(code_string(12), "101011");
    }

    #[test]
    fn test_zeckendorf_twelve() {
        let mut bits = StuffedBits::new();
        bits.set_zeckendorf(12);
        bits.set_position(0);
        assert_eq!(bits.get_zeckendorf(), 12);
        assert_eq!(bits.position(), 6);
    }

    #[test]
    fn test_zeckendorf_fibonacci_boundaries() {
        let mut values = Vec::new();
        for &f in &FIBONACCI[1..] {
            values.push(f);
            if f > 1 {
                values.push(f - 1);
            }
            if let Some(next) = f.checked_add(1) {
                values.push(next);
            }
        }
        values.push(u64::MAX);

        let mut bits = StuffedBits::with_max_bits(1024);
        bits.set_zeckendorf_array(&values);
        bits.set_position(0);
        assert_eq!(bits.get_zeckendorf_array(values.len()), values);
    }

    #[test]
    fn test_zeckendorf_max_width() {
        let (_, len) = zeckendorf_code(u64::MAX);
        assert_eq!(len, 93);
    }

    #[test]
    fn test_mixed_codes_across_segments() {
        let mut bits = StuffedBits::with_max_bits(128);
        for v in 1..500u64 {
            bits.set_elias_gamma(v);
            bits.set_zeckendorf(v * 1_000_003);
            bits.set_elias_delta(v << 20);
        }
        bits.set_position(0);
        for v in 1..500u64 {
            assert_eq!(bits.get_elias_gamma().unwrap(), v);
            assert_eq!(bits.get_zeckendorf(), v * 1_000_003);
            assert_eq!(bits.get_elias_delta().unwrap(), v << 20);
        }
    }

    proptest! {
        #[test]
        fn prop_variable_roundtrip(value in 1u64..=(1u64 << 60)) {
            let mut bits = StuffedBits::new();
            bits.set_elias_gamma(value);
            bits.set_elias_delta(value);
            bits.set_zeckendorf(value);
            bits.set_position(0);
            prop_assert_eq!(bits.get_elias_gamma().unwrap(), value);
            prop_assert_eq!(bits.get_elias_delta().unwrap(), value);
            prop_assert_eq!(bits.get_zeckendorf(), value);
        }

        #[test]
        fn prop_zeckendorf_no_adjacent_ones(value in 1u64..=(1u64 << 60)) {
            let code = code_string(value);
            prop_assert!(code.ends_with("11"));
            prop_assert!(!code[..code.len() - 1].contains("11"));
        }
    }
}
