use std::collections::{BTreeMap, HashMap};

use kmerdb::{
    db::WriterBuilder,
    lookup::{ExactLookup, LookupConfig},
    ops::{OpArena, Relation, Selector},
    DatabaseReader, Kmer, KmerCounter, KmerSize,
};

/// Two-bit code in database order (A, C, T, G)
fn code(base: u8) -> u64 {
    match base {
        b'A' => 0,
        b'C' => 1,
        b'T' => 2,
        b'G' => 3,
        _ => panic!("not a base: {base}"),
    }
}

fn encode(kmer: &[u8]) -> u64 {
    kmer.iter().fold(0, |acc, &b| (acc << 2) | code(b))
}

fn reverse_complement(kmer: &[u8]) -> Vec<u8> {
    kmer.iter()
        .rev()
        .map(|b| match b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            _ => b'A',
        })
        .collect()
}

/// Canonical k-mer counts computed directly on strings
fn reference_counts(seqs: &[&[u8]], k: usize) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    for seq in seqs {
        for window in seq.windows(k) {
            let rc = reverse_complement(window);
            let canonical = if encode(window) <= encode(&rc) {
                window.to_vec()
            } else {
                rc
            };
            *counts
                .entry(String::from_utf8(canonical).unwrap())
                .or_default() += 1;
        }
    }
    counts
}

fn read_strings(dir: &std::path::Path, size: KmerSize) -> HashMap<String, u64> {
    let mut reader = DatabaseReader::open(dir, size).unwrap();
    let mut out = HashMap::new();
    for record in reader.records() {
        let record = record.unwrap();
        assert!(out
            .insert(record.kmer.as_string(size), record.value)
            .is_none());
    }
    out
}

#[test]
fn test_count_acgt_repeat() {
    let size = KmerSize::new(4).unwrap();
    let seq: &[u8] = b"ACGTACGTACGT";

    let mut counter = KmerCounter::new(size);
    counter.add_sequence(seq);

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("acgt.meryl");
    let hist = counter
        .write_database(WriterBuilder::default(), &db, 0)
        .unwrap();

    let expected = reference_counts(&[seq], 4);
    assert_eq!(read_strings(&db, size), expected);
    assert_eq!(hist.num_total(), 9);
    assert_eq!(hist.num_distinct(), expected.len() as u64);

    let mut reader = DatabaseReader::open(&db, size).unwrap();
    let stats = reader.load_statistics();
    assert_eq!(stats.num_total(), 9);
}

#[test]
fn test_count_many_sequences() {
    let size = KmerSize::new(13).unwrap();
    let seqs: Vec<&[u8]> = vec![
        b"GATTACAGATTACAGATTACACCGGTTAACCGGTTAAGCGCGCATATATGC",
        b"TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTAAAAAAAAAAAAAAAA",
        b"ACGATCGATCGATCGTAGCTAGCTAGCTAGCTGATCGATCGTAGCTAGCTG",
    ];

    let mut counter = KmerCounter::new(size);
    for seq in &seqs {
        counter.add_sequence(seq);
    }
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("many.meryl");
    counter
        .write_database(WriterBuilder::default().prefix_size(16), &db, 4)
        .unwrap();

    assert_eq!(read_strings(&db, size), reference_counts(&seqs, 13));
}

#[test]
fn test_lookup_matches_database() {
    let size = KmerSize::new(17).unwrap();
    let seq: &[u8] = b"CCATGGATCCGAGCTCGGTACCCGGGGATCCTCTAGAGTCGACCTGCAGGCATGCAAGCTTGGCACTGGCCGTCGTTTTACAACG";

    let mut counter = KmerCounter::new(size);
    counter.add_sequence(seq);
    counter.add_sequence(&seq[10..60]);
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("lookup.meryl");
    counter
        .write_database(WriterBuilder::default(), &db, 0)
        .unwrap();

    let config = LookupConfig::default();
    let mut lookup = ExactLookup::new(&db, size, config).unwrap();
    lookup.configure(&config).unwrap();
    lookup.load().unwrap();

    let mut reader = DatabaseReader::open(&db, size).unwrap();
    let mut n = 0;
    while reader.next_mer().unwrap() {
        assert_eq!(lookup.value(reader.kmer()), reader.value());
        n += 1;
    }
    assert_eq!(lookup.len(), n);

    // a k-mer that is not in the sequence
    let absent = Kmer::parse("AAAAAAAAAAAAAAAAA", size).unwrap();
    assert!(!lookup.exists(absent));
}

#[test]
fn test_filter_then_lookup() {
    let size = KmerSize::new(5).unwrap();
    let mut counter = KmerCounter::new(size);
    counter.add_sequence(b"AAAAAAAAAACCCCCCGTACG");
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("in.meryl");
    let out = dir.path().join("out.meryl");
    let all = counter.counts();
    counter
        .write_database(WriterBuilder::default(), &db, 0)
        .unwrap();

    let mut arena = OpArena::new();
    let input = arena.input(&db);
    let root = arena.filter(input, Selector::value(Relation::Gt, 1));
    arena
        .evaluate(root, WriterBuilder::default(), &out, size, 0)
        .unwrap();

    let mut reader = DatabaseReader::open(&out, size).unwrap();
    let mut filtered = BTreeMap::new();
    while reader.next_mer().unwrap() {
        filtered.insert(reader.kmer(), reader.value());
    }
    let expected: BTreeMap<Kmer, u64> = all.into_iter().filter(|&(_, v)| v > 1).collect();
    assert!(!expected.is_empty());
    assert_eq!(filtered, expected);
}
