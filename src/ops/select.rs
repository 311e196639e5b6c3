use super::assign::Active;
use crate::{Kmer, KmerSize};

/// Comparison between a k-mer quantity and a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}
impl Relation {
    #[must_use]
    pub fn compare<T: Ord>(self, lhs: T, rhs: T) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

/// How many inputs must supply a k-mer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentCount {
    Any,
    All,
    Exactly(usize),
}

/// A condition the output k-mer must meet to be emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Compares the output value against a constant
    Value {
        relation: Relation,
        constant: u64,
        invert: bool,
    },

    /// Compares the output label against a constant
    Label {
        relation: Relation,
        constant: u64,
        invert: bool,
    },

    /// Compares the number of `bases` (any of `ACGT`) in the k-mer against
    /// a constant
    Bases {
        bases: Vec<u8>,
        relation: Relation,
        constant: u32,
        invert: bool,
    },

    /// Requires the k-mer to come from a number of inputs, and from every
    /// input listed in `inputs` (0-based)
    PresentIn {
        count: PresentCount,
        inputs: Vec<usize>,
    },
}
impl Selector {
    #[must_use]
    pub fn value(relation: Relation, constant: u64) -> Self {
        Self::Value {
            relation,
            constant,
            invert: false,
        }
    }

    #[must_use]
    pub fn label(relation: Relation, constant: u64) -> Self {
        Self::Label {
            relation,
            constant,
            invert: false,
        }
    }

    #[must_use]
    pub fn bases(bases: &[u8], relation: Relation, constant: u32) -> Self {
        Self::Bases {
            bases: bases.to_vec(),
            relation,
            constant,
            invert: false,
        }
    }

    #[must_use]
    pub fn present_in(count: PresentCount, inputs: Vec<usize>) -> Self {
        Self::PresentIn { count, inputs }
    }

    /// Negates a comparison selector; presence selectors are unchanged.
    #[must_use]
    pub fn not(mut self) -> Self {
        match &mut self {
            Self::Value { invert, .. } | Self::Label { invert, .. } | Self::Bases { invert, .. } => {
                *invert = !*invert;
            }
            Self::PresentIn { .. } => {}
        }
        self
    }

    /// Whether the output k-mer passes.
    ///
    /// `active` lists the inputs that supplied the k-mer and `num_inputs` is
    /// the number of inputs of the node.
    #[must_use]
    pub fn is_true(
        &self,
        kmer: Kmer,
        value: u64,
        label: u64,
        active: &[Active],
        num_inputs: usize,
        size: KmerSize,
    ) -> bool {
        match self {
            Self::Value {
                relation,
                constant,
                invert,
            } => relation.compare(value, *constant) != *invert,
            Self::Label {
                relation,
                constant,
                invert,
            } => relation.compare(label, *constant) != *invert,
            Self::Bases {
                bases,
                relation,
                constant,
                invert,
            } => {
                let count: u32 = bases.iter().map(|&b| kmer.count_base(b, size)).sum();
                relation.compare(count, *constant) != *invert
            }
            Self::PresentIn { count, inputs } => {
                let count_ok = match count {
                    PresentCount::Any => true,
                    PresentCount::All => active.len() == num_inputs,
                    PresentCount::Exactly(n) => active.len() == *n,
                };
                count_ok
                    && inputs
                        .iter()
                        .all(|&input| active.iter().any(|a| a.input == input))
            }
        }
    }

    /// The largest input index the selector refers to
    pub(crate) fn max_input(&self) -> Option<usize> {
        match self {
            Self::PresentIn { inputs, .. } => inputs.iter().copied().max(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(inputs: &[usize]) -> Vec<Active> {
        inputs
            .iter()
            .map(|&input| Active {
                input,
                value: 1,
                label: 0,
            })
            .collect()
    }

    #[test]
    fn test_relations() {
        assert!(Relation::Eq.compare(3, 3));
        assert!(Relation::Ne.compare(3, 4));
        assert!(Relation::Lt.compare(3, 4));
        assert!(Relation::Le.compare(4, 4));
        assert!(Relation::Gt.compare(5, 4));
        assert!(Relation::Ge.compare(4, 4));
        assert!(!Relation::Gt.compare(4, 4));
    }

    #[test]
    fn test_value_and_label() {
        let size = KmerSize::new(4).unwrap();
        let kmer = Kmer::new(0);
        let sel = Selector::value(Relation::Ge, 5);
        assert!(sel.is_true(kmer, 5, 0, &active(&[0]), 1, size));
        assert!(!sel.is_true(kmer, 4, 0, &active(&[0]), 1, size));
        assert!(sel.clone().not().is_true(kmer, 4, 0, &active(&[0]), 1, size));

        let sel = Selector::label(Relation::Eq, 0b101);
        assert!(sel.is_true(kmer, 1, 0b101, &active(&[0]), 1, size));
        assert!(!sel.is_true(kmer, 1, 0b100, &active(&[0]), 1, size));
    }

    #[test]
    fn test_bases() {
        let size = KmerSize::new(6).unwrap();
        let kmer = Kmer::parse("GCGATA", size).unwrap();
        let gc = Selector::bases(b"GC", Relation::Eq, 3);
        assert!(gc.is_true(kmer, 1, 0, &active(&[0]), 1, size));
        let at = Selector::bases(b"AT", Relation::Gt, 3);
        assert!(!at.is_true(kmer, 1, 0, &active(&[0]), 1, size));
    }

    #[test]
    fn test_present_in() {
        let size = KmerSize::new(4).unwrap();
        let kmer = Kmer::new(0);

        let all = Selector::present_in(PresentCount::All, vec![]);
        assert!(all.is_true(kmer, 1, 0, &active(&[0, 1, 2]), 3, size));
        assert!(!all.is_true(kmer, 1, 0, &active(&[0, 2]), 3, size));

        let only_first = Selector::present_in(PresentCount::Exactly(1), vec![0]);
        assert!(only_first.is_true(kmer, 1, 0, &active(&[0]), 3, size));
        assert!(!only_first.is_true(kmer, 1, 0, &active(&[1]), 3, size));
        assert!(!only_first.is_true(kmer, 1, 0, &active(&[0, 1]), 3, size));

        let any = Selector::present_in(PresentCount::Any, vec![2]);
        assert!(any.is_true(kmer, 1, 0, &active(&[1, 2]), 3, size));
        assert_eq!(any.max_input(), Some(2));
    }
}
