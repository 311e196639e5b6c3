//! Set algebra over databases.
//!
//! An [`OpArena`] holds a graph of operation nodes addressed by [`NodeId`].
//! Leaves are databases; every other node merges its inputs k-mer by k-mer,
//! computes an output value and label, and keeps the k-mers that pass its
//! selectors. Evaluation instantiates the graph once per shard as a
//! [`SliceGraph`] and runs the shards in parallel.

mod assign;
mod select;

use std::path::{Path, PathBuf};
use std::thread;

pub use assign::{Active, LabelAssign, ValueAssign};
pub use select::{PresentCount, Relation, Selector};

use crate::{
    bits::low_mask,
    db::{resolve_threads, DatabaseReader, DatabaseWriter, KmerRecord, WriterBuilder},
    error::OpError,
    Histogram, Kmer, KmerSize, Result,
};

/// Index of a node in an [`OpArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub enum OpNode {
    /// A database on disk
    Input(PathBuf),

    /// A k-mer-wise merge of `inputs`
    Compute {
        inputs: Vec<NodeId>,
        value: (ValueAssign, u64),
        label: (LabelAssign, u64),
        selectors: Vec<Selector>,
    },
}

/// Visit state used while checking the graph
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Open,
    Done,
}

/// Arena of operation nodes.
#[derive(Debug, Clone, Default)]
pub struct OpArena {
    nodes: Vec<OpNode>,
}
impl OpArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: OpNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn input<P: AsRef<Path>>(&mut self, path: P) -> NodeId {
        self.add(OpNode::Input(path.as_ref().to_path_buf()))
    }

    pub fn compute(
        &mut self,
        inputs: Vec<NodeId>,
        value: (ValueAssign, u64),
        label: (LabelAssign, u64),
        selectors: Vec<Selector>,
    ) -> NodeId {
        self.add(OpNode::Compute {
            inputs,
            value,
            label,
            selectors,
        })
    }

    /// Every k-mer in any input, with the value of the first input holding it
    pub fn union(&mut self, inputs: Vec<NodeId>) -> NodeId {
        self.compute(
            inputs,
            (ValueAssign::First, 0),
            (LabelAssign::First, 0),
            Vec::new(),
        )
    }

    /// K-mers present in every input
    pub fn intersect(&mut self, inputs: Vec<NodeId>) -> NodeId {
        self.compute(
            inputs,
            (ValueAssign::First, 0),
            (LabelAssign::First, 0),
            vec![Selector::present_in(PresentCount::All, Vec::new())],
        )
    }

    /// K-mers present in the first input and no other
    pub fn difference(&mut self, inputs: Vec<NodeId>) -> NodeId {
        self.compute(
            inputs,
            (ValueAssign::First, 0),
            (LabelAssign::First, 0),
            vec![Selector::present_in(PresentCount::Exactly(1), vec![0])],
        )
    }

    /// K-mers of `input` that pass `selector`
    pub fn filter(&mut self, input: NodeId, selector: Selector) -> NodeId {
        self.compute(
            vec![input],
            (ValueAssign::First, 0),
            (LabelAssign::First, 0),
            vec![selector],
        )
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&OpNode> {
        self.nodes.get(id.0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Checks the graph under `root`.
    ///
    /// Fails on missing node ids, cycles, nodes feeding more than one
    /// consumer, compute nodes without inputs, single-input label operations
    /// with several inputs and presence selectors naming missing inputs.
    pub fn validate(&self, root: NodeId) -> Result<()> {
        if root.0 >= self.nodes.len() {
            return Err(OpError::DanglingInput {
                node: root.0,
                input: root.0,
            }
            .into());
        }
        let mut marks = vec![Mark::New; self.nodes.len()];
        self.visit(root, &mut marks)
    }

    fn visit(&self, id: NodeId, marks: &mut [Mark]) -> Result<()> {
        match marks[id.0] {
            Mark::Open => return Err(OpError::Cycle(id.0).into()),
            Mark::Done => return Err(OpError::SharedNode(id.0).into()),
            Mark::New => {}
        }
        marks[id.0] = Mark::Open;

        if let OpNode::Compute {
            inputs,
            label,
            selectors,
            ..
        } = &self.nodes[id.0]
        {
            if inputs.is_empty() {
                return Err(OpError::NoInputs(id.0).into());
            }
            if label.0.is_single_input() && inputs.len() != 1 {
                return Err(OpError::Arity {
                    op: label.0.name(),
                    found: inputs.len(),
                }
                .into());
            }
            for selector in selectors {
                if let Some(input) = selector.max_input() {
                    if input >= inputs.len() {
                        return Err(OpError::SelectorInput {
                            node: id.0,
                            input,
                            num_inputs: inputs.len(),
                        }
                        .into());
                    }
                }
            }
            for &input in inputs {
                if input.0 >= self.nodes.len() {
                    return Err(OpError::DanglingInput {
                        node: id.0,
                        input: input.0,
                    }
                    .into());
                }
                self.visit(input, marks)?;
            }
        }

        marks[id.0] = Mark::Done;
        Ok(())
    }

    /// Database paths under `root`, in node order
    fn input_paths(&self, root: NodeId) -> Vec<&Path> {
        let mut paths = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            match self.nodes.get(id.0) {
                Some(OpNode::Input(path)) => paths.push(path.as_path()),
                Some(OpNode::Compute { inputs, .. }) => stack.extend(inputs.iter().rev()),
                None => {}
            }
        }
        paths
    }

    /// Instantiates the graph under `root` for one shard.
    pub fn slice(&self, root: NodeId, size: KmerSize, shard: u32) -> Result<SliceGraph> {
        self.validate(root)?;

        let mut nodes: Vec<SliceNode> = Vec::with_capacity(self.nodes.len());
        nodes.resize_with(self.nodes.len(), SliceNode::default);

        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            nodes[id.0] = match &self.nodes[id.0] {
                OpNode::Input(path) => {
                    let mut reader = DatabaseReader::open(path, size)?;
                    reader.enable_threads(shard)?;
                    SliceNode::Input(Box::new(reader))
                }
                OpNode::Compute {
                    inputs,
                    value,
                    label,
                    selectors,
                } => {
                    stack.extend(inputs.iter().copied());
                    SliceNode::Compute(ComputeState {
                        inputs: inputs.clone(),
                        value: *value,
                        label: *label,
                        selectors: selectors.clone(),
                        heads: vec![None; inputs.len()],
                        active: Vec::with_capacity(inputs.len()),
                        started: false,
                    })
                }
            };
        }

        Ok(SliceGraph {
            nodes,
            root,
            size,
            shard,
            record: KmerRecord::default(),
        })
    }

    /// Evaluates `root` into a new database at `out_dir`.
    ///
    /// Each shard is computed from the same shard of every input and written
    /// by its own thread. Returns the histogram of the output.
    ///
    /// # Arguments
    ///
    /// * `root` - The node whose output is written
    /// * `builder` - Output database options
    /// * `out_dir` - Directory of the output database
    /// * `size` - The k-mer size of every input
    /// * `num_threads` - The number of threads to spawn (0 for all CPUs)
    pub fn evaluate<P: AsRef<Path>>(
        &self,
        root: NodeId,
        builder: WriterBuilder,
        out_dir: P,
        size: KmerSize,
        num_threads: usize,
    ) -> Result<Histogram> {
        self.validate(root)?;
        let writer = builder.build(out_dir, size)?;
        let num_files = writer.layout().num_files();

        for path in self.input_paths(root) {
            let reader = DatabaseReader::open(path, size)?;
            if reader.num_files() != num_files {
                return Err(OpError::ShardMismatch {
                    path: path.display().to_string(),
                    expected: num_files,
                    found: reader.num_files(),
                }
                .into());
            }
        }

        let num_threads = resolve_threads(num_threads) as u32;
        let shards_per_thread = num_files.div_ceil(num_threads);
        log::info!(
            "evaluating {} nodes over {num_files} shards with {num_threads} threads",
            self.nodes.len()
        );

        thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::new();
            for tid in 0..num_threads {
                let writer = &writer;
                let handle = scope.spawn(move || -> Result<()> {
                    let start = tid * shards_per_thread;
                    let end = (start + shards_per_thread).min(num_files);
                    for shard in start..end {
                        self.write_shard(root, size, shard, writer)?;
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
        })?;

        writer.finish()
    }

    fn write_shard(
        &self,
        root: NodeId,
        size: KmerSize,
        shard: u32,
        writer: &DatabaseWriter,
    ) -> Result<()> {
        let mut graph = self.slice(root, size, shard)?;
        let mut out = writer.shard(shard)?;
        let layout = writer.layout();
        let label_mask = low_mask(u64::from(writer.label_bits()));

        let mut prefix = None;
        let mut suffixes = Vec::new();
        let mut values = Vec::new();
        let mut labels = Vec::new();

        while graph.next_mer()? {
            let record = graph.record();
            let p = layout.prefix_of(record.kmer);
            if prefix != Some(p) {
                if let Some(prev) = prefix {
                    out.add_block(prev, &suffixes, &values, &labels)?;
                    suffixes.clear();
                    values.clear();
                    labels.clear();
                }
                prefix = Some(p);
            }
            suffixes.push(layout.suffix_of(record.kmer));
            values.push(record.value);
            labels.push(record.label & label_mask);
        }
        if let Some(prev) = prefix {
            out.add_block(prev, &suffixes, &values, &labels)?;
        }

        out.finish()?;
        Ok(())
    }
}

/// Merge state of one compute node
#[derive(Debug)]
struct ComputeState {
    inputs: Vec<NodeId>,
    value: (ValueAssign, u64),
    label: (LabelAssign, u64),
    selectors: Vec<Selector>,

    /// Current k-mer of each input; `None` once an input is exhausted
    heads: Vec<Option<KmerRecord>>,

    /// Inputs holding the last emitted k-mer
    active: Vec<Active>,
    started: bool,
}

#[derive(Default)]
enum SliceNode {
    /// Not reachable from the root
    #[default]
    Unused,
    Input(Box<DatabaseReader>),
    Compute(ComputeState),
}

/// The operation graph bound to one shard.
///
/// Nodes are stored in a vector parallel to the arena, so a [`NodeId`]
/// addresses the same operation in both.
pub struct SliceGraph {
    nodes: Vec<SliceNode>,
    root: NodeId,
    size: KmerSize,
    shard: u32,
    record: KmerRecord,
}
impl SliceGraph {
    /// Advances the root to its next output k-mer.
    ///
    /// Returns `false` once every input is exhausted.
    pub fn next_mer(&mut self) -> Result<bool> {
        match self.advance(self.root)? {
            Some(record) => {
                self.record = record;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn advance(&mut self, id: NodeId) -> Result<Option<KmerRecord>> {
        let mut node = std::mem::take(&mut self.nodes[id.0]);
        let result = match &mut node {
            SliceNode::Unused => Ok(None),
            SliceNode::Input(reader) => match reader.next_mer() {
                Ok(true) => Ok(Some(reader.record())),
                Ok(false) => Ok(None),
                Err(e) => Err(e),
            },
            SliceNode::Compute(state) => self.advance_compute(state),
        };
        self.nodes[id.0] = node;
        result
    }

    fn advance_compute(&mut self, state: &mut ComputeState) -> Result<Option<KmerRecord>> {
        let num_inputs = state.inputs.len();
        loop {
            // refill the inputs consumed by the previous k-mer
            let consumed: Vec<usize> = if state.started {
                state.active.iter().map(|a| a.input).collect()
            } else {
                state.started = true;
                (0..num_inputs).collect()
            };
            for input in consumed {
                state.heads[input] = self.advance(state.inputs[input])?;
            }

            let Some(kmer) = state.heads.iter().flatten().map(|r| r.kmer).min() else {
                state.active.clear();
                return Ok(None);
            };

            state.active.clear();
            for (input, head) in state.heads.iter().enumerate() {
                if let Some(record) = head {
                    if record.kmer == kmer {
                        state.active.push(Active {
                            input,
                            value: record.value,
                            label: record.label,
                        });
                    }
                }
            }

            let value = state.value.0.apply(state.value.1, &state.active);
            if value == 0 {
                continue;
            }
            let label = state.label.0.apply(state.label.1, &state.active);

            let selected = state.selectors.iter().all(|selector| {
                selector.is_true(kmer, value, label, &state.active, num_inputs, self.size)
            });
            if selected {
                return Ok(Some(KmerRecord::new(kmer, value, label)));
            }
        }
    }

    #[must_use]
    pub fn shard(&self) -> u32 {
        self.shard
    }

    #[must_use]
    pub fn record(&self) -> KmerRecord {
        self.record
    }

    #[must_use]
    pub fn kmer(&self) -> Kmer {
        self.record.kmer
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.record.value
    }

    #[must_use]
    pub fn label(&self) -> u64 {
        self.record.label
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    const K: usize = 8;

    fn size() -> KmerSize {
        KmerSize::new(K).unwrap()
    }

    fn build(dir: &Path, kmers: &[(u128, u64)]) {
        let writer = WriterBuilder::default().build(dir, size()).unwrap();
        let mut stream = writer.stream();
        for &(kmer, value) in kmers {
            stream.add_mer(Kmer::new(kmer), value, 0).unwrap();
        }
        stream.finish().unwrap();
        writer.finish().unwrap();
    }

    fn read_all(dir: &Path) -> BTreeMap<u128, u64> {
        let mut reader = DatabaseReader::open(dir, size()).unwrap();
        let mut out = BTreeMap::new();
        while reader.next_mer().unwrap() {
            out.insert(reader.kmer().bits(), reader.value());
        }
        out
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        a: PathBuf,
        b: PathBuf,
        out: PathBuf,
    }

    /// `a` and `b` share k-mers 0x0100 and 0xf000; k-mers span several shards
    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.meryl");
        let b = tmp.path().join("b.meryl");
        let out = tmp.path().join("out.meryl");
        build(&a, &[(0x0001, 3), (0x0100, 5), (0xf000, 2)]);
        build(&b, &[(0x0100, 7), (0x4000, 1), (0xf000, 4)]);
        Fixture { _tmp: tmp, a, b, out }
    }

    #[test]
    fn test_union() {
        let f = fixture();
        let mut arena = OpArena::new();
        let a = arena.input(&f.a);
        let b = arena.input(&f.b);
        let root = arena.union(vec![a, b]);
        let hist = arena
            .evaluate(root, WriterBuilder::default(), &f.out, size(), 2)
            .unwrap();

        let expected: BTreeMap<u128, u64> = [(0x0001, 3), (0x0100, 5), (0x4000, 1), (0xf000, 2)]
            .into_iter()
            .collect();
        assert_eq!(read_all(&f.out), expected);
        assert_eq!(hist.num_distinct(), 4);
    }

    #[test]
    fn test_intersect_with_sum() {
        let f = fixture();
        let mut arena = OpArena::new();
        let a = arena.input(&f.a);
        let b = arena.input(&f.b);
        let root = arena.compute(
            vec![a, b],
            (ValueAssign::Add, 0),
            (LabelAssign::First, 0),
            vec![Selector::present_in(PresentCount::All, Vec::new())],
        );
        arena
            .evaluate(root, WriterBuilder::default(), &f.out, size(), 0)
            .unwrap();

        let expected: BTreeMap<u128, u64> = [(0x0100, 12), (0xf000, 6)].into_iter().collect();
        assert_eq!(read_all(&f.out), expected);
    }

    #[test]
    fn test_difference_and_filter() {
        let f = fixture();
        let mut arena = OpArena::new();
        let a = arena.input(&f.a);
        let b = arena.input(&f.b);
        let diff = arena.difference(vec![a, b]);
        let root = arena.filter(diff, Selector::value(Relation::Ge, 3));
        arena
            .evaluate(root, WriterBuilder::default(), &f.out, size(), 1)
            .unwrap();

        let expected: BTreeMap<u128, u64> = [(0x0001, 3)].into_iter().collect();
        assert_eq!(read_all(&f.out), expected);
    }

    #[test]
    fn test_zero_values_dropped() {
        let f = fixture();
        let mut arena = OpArena::new();
        let a = arena.input(&f.a);
        let b = arena.input(&f.b);
        // a - b, saturating; k-mers reaching 0 are dropped
        let root = arena.compute(
            vec![a, b],
            (ValueAssign::Sub, 0),
            (LabelAssign::First, 0),
            Vec::new(),
        );
        arena
            .evaluate(root, WriterBuilder::default(), &f.out, size(), 0)
            .unwrap();

        let expected: BTreeMap<u128, u64> = [(0x0001, 3), (0x4000, 1)].into_iter().collect();
        assert_eq!(read_all(&f.out), expected);
    }

    #[test]
    fn test_slice_matches_shard() {
        let f = fixture();
        let mut arena = OpArena::new();
        let a = arena.input(&f.a);
        let b = arena.input(&f.b);
        let root = arena.union(vec![a, b]);

        // 0xf000 has top six bits 0b111100 and is alone in shard 60
        let mut graph = arena.slice(root, size(), 60).unwrap();
        assert_eq!(graph.shard(), 60);
        assert!(graph.next_mer().unwrap());
        assert_eq!(graph.kmer(), Kmer::new(0xf000));
        assert_eq!(graph.value(), 2);
        assert!(!graph.next_mer().unwrap());
        assert!(!graph.next_mer().unwrap());
    }

    #[test]
    fn test_nested_graph() {
        let f = fixture();
        let mut arena = OpArena::new();
        let a = arena.input(&f.a);
        let b1 = arena.input(&f.b);
        let b2 = arena.input(&f.b);
        let only_a = arena.difference(vec![a, b1]);
        let root = arena.compute(
            vec![only_a, b2],
            (ValueAssign::Count, 0),
            (LabelAssign::First, 0),
            Vec::new(),
        );
        arena
            .evaluate(root, WriterBuilder::default(), &f.out, size(), 0)
            .unwrap();

        let expected: BTreeMap<u128, u64> = [(0x0001, 1), (0x0100, 1), (0x4000, 1), (0xf000, 1)]
            .into_iter()
            .collect();
        assert_eq!(read_all(&f.out), expected);
    }

    #[test]
    fn test_validation_errors() {
        let mut arena = OpArena::new();
        let a = arena.input("a.meryl");
        let dangling = arena.union(vec![a, NodeId(42)]);
        assert!(matches!(
            arena.validate(dangling),
            Err(crate::Error::OpError(OpError::DanglingInput { input: 42, .. }))
        ));

        let empty = arena.union(Vec::new());
        assert!(matches!(
            arena.validate(empty),
            Err(crate::Error::OpError(OpError::NoInputs(_)))
        ));

        let b = arena.input("b.meryl");
        let invert = arena.compute(
            vec![a, b],
            (ValueAssign::First, 0),
            (LabelAssign::Invert, 0),
            Vec::new(),
        );
        assert!(matches!(
            arena.validate(invert),
            Err(crate::Error::OpError(OpError::Arity { op: "invert", found: 2 }))
        ));

        let shared = arena.union(vec![a, a]);
        assert!(matches!(
            arena.validate(shared),
            Err(crate::Error::OpError(OpError::SharedNode(_)))
        ));

        let bad_selector = arena.filter(b, Selector::present_in(PresentCount::Any, vec![3]));
        assert!(matches!(
            arena.validate(bad_selector),
            Err(crate::Error::OpError(OpError::SelectorInput { input: 3, .. }))
        ));

        assert!(arena.validate(NodeId(1000)).is_err());
    }

    #[test]
    fn test_cycle() {
        let mut arena = OpArena::new();
        let a = arena.input("a.meryl");
        // node 1 reads node 2, which reads node 1
        arena.union(vec![a, NodeId(2)]);
        let root = arena.union(vec![NodeId(1)]);
        assert!(matches!(
            arena.validate(root),
            Err(crate::Error::OpError(OpError::Cycle(_)))
        ));
    }
}
