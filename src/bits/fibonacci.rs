/// Number of Fibonacci entries needed to cover every `u64`.
pub const FIBONACCI_LEN: usize = 93;

/// Fibonacci numbers with `FIBONACCI[0] == FIBONACCI[1] == 1`.
///
/// Zeckendorf codes index into this table; entry 0 never appears in a code.
pub const FIBONACCI: [u64; FIBONACCI_LEN] = build_table();

const fn build_table() -> [u64; FIBONACCI_LEN] {
    let mut table = [0u64; FIBONACCI_LEN];
    table[0] = 1;
    table[1] = 1;
    let mut i = 2;
    while i < FIBONACCI_LEN {
        table[i] = table[i - 1] + table[i - 2];
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_prefix() {
        assert_eq!(&FIBONACCI[..8], &[1, 1, 2, 3, 5, 8, 13, 21]);
    }

    #[test]
    fn test_table_covers_u64() {
        let last = FIBONACCI[FIBONACCI_LEN - 1];
        let prev = FIBONACCI[FIBONACCI_LEN - 2];
        assert_eq!(last, 12_200_160_415_121_876_738);
        // the next entry would overflow
        assert!(last.checked_add(prev).is_none());
    }
}
