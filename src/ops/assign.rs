/// One input that supplied the current k-mer, with its value and label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Active {
    /// Position of the input in its node's input list
    pub input: usize,
    pub value: u64,
    pub label: u64,
}

/// How the output value is computed from the active inputs.
///
/// Every variant except `Nop`, `Set`, `First` and `Count` folds the node's
/// constant in with the input values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueAssign {
    /// Keep the value of the first active input
    Nop,
    /// The constant
    Set,
    /// The value of the first active input
    #[default]
    First,
    /// Smallest of the constant and every input value
    Min,
    /// Largest of the constant and every input value
    Max,
    /// Constant plus every input value, saturating
    Add,
    /// First value minus the others and the constant, stopping at 0
    Sub,
    /// Constant times every input value, saturating
    Mul,
    /// First value divided by the others and the constant; division by 0 gives 0
    Div,
    /// Like `Div` but rounded, and a quotient below 1 becomes 1
    DivZ,
    /// Sum of the remainders left by dividing the first value by the
    /// others and the constant in turn
    Mod,
    /// Number of active inputs
    Count,
}
impl ValueAssign {
    /// Computes the output value. `active` is never empty.
    #[must_use]
    pub fn apply(self, constant: u64, active: &[Active]) -> u64 {
        let first = active.first().map_or(0, |a| a.value);
        let rest = active.iter().skip(1).map(|a| a.value);
        let all = active.iter().map(|a| a.value);

        match self {
            Self::Nop | Self::First => first,
            Self::Set => constant,
            Self::Min => all.fold(constant, u64::min),
            Self::Max => all.fold(constant, u64::max),
            Self::Add => all.fold(constant, u64::saturating_add),
            Self::Sub => rest
                .chain(std::iter::once(constant))
                .fold(first, u64::saturating_sub),
            Self::Mul => all.fold(constant, u64::saturating_mul),
            Self::Div => rest
                .chain(std::iter::once(constant))
                .fold(first, |acc, d| acc.checked_div(d).unwrap_or(0)),
            Self::DivZ => rest
                .chain(std::iter::once(constant))
                .fold(first, round_div),
            Self::Mod => {
                rest.chain(std::iter::once(constant))
                    .fold((first, 0u64), |(q, r), d| match q.checked_div(d) {
                        Some(qt) => (qt, r + (q - qt * d)),
                        None => (0, r + q),
                    })
                    .1
            }
            Self::Count => active.len() as u64,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Set => "set",
            Self::First => "first",
            Self::Min => "min",
            Self::Max => "max",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::DivZ => "divzero",
            Self::Mod => "mod",
            Self::Count => "count",
        }
    }
}

/// Rounded division where 0 < quotient < 1 becomes 1 and a zero divisor gives 0
fn round_div(n: u64, d: u64) -> u64 {
    if d == 0 {
        0
    } else if n < d {
        1
    } else {
        (n as f64 / d as f64).round() as u64
    }
}

/// How the output label is computed from the active inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelAssign {
    /// Keep the label of the first active input
    Nop,
    /// The constant
    Set,
    /// The label of the first active input
    #[default]
    First,
    /// The label of the input with the smallest value, or the constant if
    /// every value is `u64::MAX`
    Min,
    /// Largest of the constant and every input label
    Max,
    And,
    Or,
    Xor,
    /// First label with the constant and every other label cleared
    Difference,
    /// The label with the fewest set bits, starting from the constant
    Lightest,
    /// The label with the most set bits, starting from the constant
    Heaviest,
    /// Bitwise complement; single input only
    Invert,
    /// Shift left by the constant; single input only
    ShiftLeft,
    /// Shift right by the constant; single input only
    ShiftRight,
}
impl LabelAssign {
    /// Whether the operation is only defined on one input
    #[must_use]
    pub fn is_single_input(self) -> bool {
        matches!(self, Self::Invert | Self::ShiftLeft | Self::ShiftRight)
    }

    /// Computes the output label. `active` is never empty.
    #[must_use]
    pub fn apply(self, constant: u64, active: &[Active]) -> u64 {
        let first = active.first().map_or(0, |a| a.label);
        let all = active.iter().map(|a| a.label);

        match self {
            Self::Nop | Self::First => first,
            Self::Set => constant,
            Self::Min => {
                let mut label = constant;
                let mut value = u64::MAX;
                for a in active {
                    if a.value < value {
                        label = a.label;
                        value = a.value;
                    }
                }
                label
            }
            Self::Max => all.fold(constant, u64::max),
            Self::And => all.fold(constant, |acc, l| acc & l),
            Self::Or => all.fold(constant, |acc, l| acc | l),
            Self::Xor => all.fold(constant, |acc, l| acc ^ l),
            Self::Difference => all.skip(1).fold(first & !constant, |acc, l| acc & !l),
            Self::Lightest => all.fold(constant, |acc, l| {
                if l.count_ones() < acc.count_ones() {
                    l
                } else {
                    acc
                }
            }),
            Self::Heaviest => all.fold(constant, |acc, l| {
                if l.count_ones() > acc.count_ones() {
                    l
                } else {
                    acc
                }
            }),
            Self::Invert => !first,
            Self::ShiftLeft => first.checked_shl(constant as u32).unwrap_or(0),
            Self::ShiftRight => first.checked_shr(constant as u32).unwrap_or(0),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Set => "set",
            Self::First => "first",
            Self::Min => "min",
            Self::Max => "max",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Difference => "difference",
            Self::Lightest => "lightest",
            Self::Heaviest => "heaviest",
            Self::Invert => "invert",
            Self::ShiftLeft => "shift-left",
            Self::ShiftRight => "shift-right",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn act(values: &[u64]) -> Vec<Active> {
        values
            .iter()
            .enumerate()
            .map(|(input, &value)| Active {
                input,
                value,
                label: 0,
            })
            .collect()
    }

    fn labels(labels: &[(u64, u64)]) -> Vec<Active> {
        labels
            .iter()
            .enumerate()
            .map(|(input, &(value, label))| Active {
                input,
                value,
                label,
            })
            .collect()
    }

    #[test]
    fn test_value_basic() {
        let a = act(&[7, 3, 5]);
        assert_eq!(ValueAssign::First.apply(99, &a), 7);
        assert_eq!(ValueAssign::Nop.apply(99, &a), 7);
        assert_eq!(ValueAssign::Set.apply(99, &a), 99);
        assert_eq!(ValueAssign::Min.apply(u64::MAX, &a), 3);
        assert_eq!(ValueAssign::Min.apply(1, &a), 1);
        assert_eq!(ValueAssign::Max.apply(0, &a), 7);
        assert_eq!(ValueAssign::Add.apply(0, &a), 15);
        assert_eq!(ValueAssign::Count.apply(0, &a), 3);
    }

    #[test]
    fn test_value_saturation() {
        let a = act(&[u64::MAX - 1, 5]);
        assert_eq!(ValueAssign::Add.apply(0, &a), u64::MAX);
        assert_eq!(ValueAssign::Mul.apply(1, &a), u64::MAX);
        assert_eq!(ValueAssign::Mul.apply(1, &act(&[3, 4])), 12);

        assert_eq!(ValueAssign::Sub.apply(0, &act(&[10, 3])), 7);
        assert_eq!(ValueAssign::Sub.apply(2, &act(&[10, 3])), 5);
        assert_eq!(ValueAssign::Sub.apply(0, &act(&[3, 10])), 0);
    }

    #[test]
    fn test_value_division() {
        assert_eq!(ValueAssign::Div.apply(1, &act(&[20, 3])), 6);
        assert_eq!(ValueAssign::Div.apply(0, &act(&[20, 3])), 0);
        assert_eq!(ValueAssign::Div.apply(2, &act(&[20, 0])), 0);

        assert_eq!(ValueAssign::DivZ.apply(1, &act(&[20, 3])), 7);
        assert_eq!(ValueAssign::DivZ.apply(1, &act(&[2, 3])), 1);
        assert_eq!(ValueAssign::DivZ.apply(0, &act(&[20])), 0);
        assert_eq!(ValueAssign::DivZ.apply(4, &act(&[10])), 3);
    }

    #[test]
    fn test_value_mod() {
        // 23 % 5 = 3, 23 / 5 = 4; 4 % 3 = 1
        assert_eq!(ValueAssign::Mod.apply(3, &act(&[23, 5])), 4);
        assert_eq!(ValueAssign::Mod.apply(7, &act(&[23])), 2);
        assert_eq!(ValueAssign::Mod.apply(0, &act(&[23])), 23);
    }

    #[test]
    fn test_label_bitwise() {
        let a = labels(&[(1, 0b1100), (1, 0b1010)]);
        assert_eq!(LabelAssign::And.apply(u64::MAX, &a), 0b1000);
        assert_eq!(LabelAssign::Or.apply(0, &a), 0b1110);
        assert_eq!(LabelAssign::Xor.apply(0, &a), 0b0110);
        assert_eq!(LabelAssign::Max.apply(0, &a), 0b1100);
        assert_eq!(LabelAssign::Difference.apply(0, &a), 0b0100);
        assert_eq!(LabelAssign::Difference.apply(0b0100, &a), 0);
        assert_eq!(LabelAssign::Set.apply(5, &a), 5);
    }

    #[test]
    fn test_label_weight_and_min() {
        let a = labels(&[(9, 0b0111), (2, 0b0001), (5, 0b1111)]);
        assert_eq!(LabelAssign::Min.apply(0, &a), 0b0001);
        assert_eq!(LabelAssign::Lightest.apply(u64::MAX, &a), 0b0001);
        assert_eq!(LabelAssign::Heaviest.apply(0, &a), 0b1111);
    }

    #[test]
    fn test_label_single_input() {
        let a = labels(&[(1, 0b0110)]);
        assert_eq!(LabelAssign::ShiftLeft.apply(2, &a), 0b11000);
        assert_eq!(LabelAssign::ShiftRight.apply(1, &a), 0b0011);
        assert_eq!(LabelAssign::ShiftRight.apply(64, &a), 0);
        assert_eq!(LabelAssign::Invert.apply(0, &a), !0b0110);
        assert!(LabelAssign::Invert.is_single_input());
        assert!(!LabelAssign::Or.is_single_input());
    }
}
