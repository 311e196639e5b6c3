//! # kmerdb
//!
//! Sharded, Elias-Fano coded k-mer databases in the meryl on-disk format,
//! with histogram statistics, an in-memory exact lookup table and set
//! operations over databases.
//!
//! ## Overview
//!
//! A k-mer is a string of `k` nucleotides packed two bits per base. A
//! database maps every stored k-mer to a count (its *value*) and an optional
//! bit-field *label*. On disk it is a directory with a master index and up to
//! 64 shards; each shard holds blocks of k-mers sharing a prefix, with the
//! suffixes stored as Elias-Fano sequences in a [`StuffedBits`](bits::StuffedBits)
//! bit stream.
//!
//! ## Modules
//!
//! * [`bits`]: the bit stream codec (binary, unary, Elias gamma and delta,
//!   Zeckendorf) and packed integer arrays
//! * [`kmer`]: k-mer encoding, reverse complement and sequence iteration
//! * [`db`]: database writer, reader, block reader and parallel processing
//! * [`histogram`]: value histograms, statistics and ploidy peaks
//! * [`lookup`]: memory-bounded exact lookup with optional position lists
//! * [`ops`]: union, intersection, difference and filters as an operation graph
//! * [`count`]: in-memory counting of sequences into a new database
//!
//! ## Example
//!
//! ```
//! use kmerdb::{Kmer, KmerSize};
//!
//! let size = KmerSize::new(5).unwrap();
//! let kmer = Kmer::parse("ACGTT", size).unwrap();
//! let rc = kmer.reverse_complement(size);
//! assert_eq!(rc.as_string(size), "AACGT");
//! assert_eq!(kmer.canonical(size), rc);
//! ```
//!
//! Counting sequences and querying the result:
//!
//! ```no_run
//! use kmerdb::{
//!     db::WriterBuilder,
//!     lookup::{ExactLookup, LookupConfig},
//!     KmerCounter, KmerSize, Kmer,
//! };
//!
//! let size = KmerSize::new(21).unwrap();
//! let mut counter = KmerCounter::new(size);
//! counter.add_sequence(b"ACGTACGTTGCAACGTAGCTAGCTAGCATCGATCGA");
//! counter.write_database(WriterBuilder::default(), "reads.meryl", 0).unwrap();
//!
//! let config = LookupConfig::default();
//! let mut lookup = ExactLookup::new("reads.meryl", size, config).unwrap();
//! lookup.configure(&config).unwrap();
//! lookup.load().unwrap();
//! let kmer = Kmer::parse("ACGTACGTTGCAACGTAGCTA", size).unwrap();
//! println!("{}", lookup.value(kmer.canonical(size)));
//! ```

pub mod bits;
pub mod count;
pub mod db;
pub mod error;
pub mod histogram;
pub mod kmer;
pub mod lookup;
pub mod ops;

pub use count::KmerCounter;
pub use db::{DatabaseReader, DatabaseWriter, KmerRecord, WriterBuilder};
pub use error::{Error, Result};
pub use histogram::{Histogram, PloidyPeaks};
pub use kmer::{Kmer, KmerIter, KmerSize, KmerWindow};
pub use lookup::{ExactLookup, LookupConfig};
