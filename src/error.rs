use std::path::PathBuf;

/// Custom Result type for kmerdb operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the kmerdb library, encompassing all possible error cases
/// that can occur while encoding, writing, reading or querying k-mer databases.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors related to on-disk format headers and magic numbers
    #[error("Error processing format: {0}")]
    FormatError(#[from] FormatError),

    /// Errors that occur during write operations
    #[error("Error writing database: {0}")]
    WriteError(#[from] WriteError),

    /// Errors that occur during read operations
    #[error("Error reading database: {0}")]
    ReadError(#[from] ReadError),

    /// Errors raised while sizing or building a lookup table
    #[error("Error building lookup: {0}")]
    LookupError(#[from] LookupError),

    /// Errors raised by the operation graph
    #[error("Error evaluating operation: {0}")]
    OpError(#[from] OpError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),
}
impl Error {
    /// Checks if the error is a k-mer size mismatch
    ///
    /// Callers that open several databases in one run use this to tell a
    /// configuration problem apart from corrupt input.
    #[must_use]
    pub fn is_kmer_size_mismatch(&self) -> bool {
        matches!(
            self,
            Self::FormatError(FormatError::IncompatibleKmerSize { .. })
                | Self::LookupError(LookupError::IncompatibleKmerSize { .. })
        )
    }

    /// Checks if the error is a resource (memory budget) failure
    #[must_use]
    pub fn is_insufficient_memory(&self) -> bool {
        matches!(self, Self::LookupError(LookupError::InsufficientMemory { .. }))
    }
}

/// Errors specific to parsing and validating on-disk headers
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    /// The master index magic number does not match any known version
    ///
    /// # Arguments
    /// * First `u64` - The first magic word
    /// * Second `u64` - The second (version) magic word
    #[error("Invalid master index magic: 0x{0:016x} 0x{1:016x}")]
    InvalidMasterMagic(u64, u64),

    /// The data block magic number is not a data block at all
    #[error("Invalid data block magic: 0x{0:016x} 0x{1:016x}")]
    InvalidDataMagic(u64, u64),

    /// The data block magic looks like a data block, but with an unknown version
    #[error("Unsupported data block version: 0x{0:016x}")]
    UnsupportedDataVersion(u64),

    /// A suffix, value or label coding type that this library cannot decode
    #[error("Unknown {kind} coding type: {code}")]
    UnknownCoding { kind: &'static str, code: u64 },

    /// The database was built with a different k-mer size than requested
    #[error("Incompatible k-mer size: expected k={expected}, database has k={found}")]
    IncompatibleKmerSize { expected: usize, found: usize },

    /// The k-mer size is outside of the supported range
    #[error("Invalid k-mer size: {0} - expecting [1,64]")]
    InvalidKmerSize(usize),

    /// The prefix/suffix split is not usable
    #[error("Invalid prefix size {prefix} for {total} k-mer bits")]
    InvalidPrefixSize { prefix: u32, total: u32 },

    /// A k-mer string contained a non-ACGT character or had the wrong length
    #[error("Invalid k-mer string: {0}")]
    InvalidKmerString(String),
}

/// Errors that can occur while reading database files
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The database directory or its master index does not exist
    #[error("Database not found: {0}")]
    MissingDatabase(PathBuf),

    /// The file being read is not a regular file
    #[error("File is not regular: {0}")]
    IncompatibleFile(PathBuf),

    /// A stream ended in the middle of a record
    ///
    /// # Arguments
    /// * `u64` - The bit position where the truncation was detected
    #[error("Stream truncated at bit position {0}")]
    Truncated(u64),

    /// A variable-length code whose decoded width exceeds 64 bits
    #[error("Invalid {code} code at bit position {position}: width {width}")]
    InvalidCode {
        code: &'static str,
        width: u64,
        position: u64,
    },

    /// A shard index beyond the number of shards in the database
    #[error("Requested shard ({requested}) is out of range ({max})")]
    ShardOutOfRange { requested: u32, max: u32 },

    /// The block index file has an unexpected size
    #[error("Block index size mismatch: found {found} bytes, expected {expected}")]
    BlockIndexSize { found: usize, expected: usize },
}

/// Errors that can occur while writing database files
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// The writer was initialized twice with different prefix sizes
    #[error("Prefix size cannot change once set: was {current}, requested {requested}")]
    PrefixSizeChanged { current: u32, requested: u32 },

    /// Suffixes within a block are not in ascending order
    #[error("Unsorted suffixes in block 0x{prefix:x} at position {position}")]
    UnsortedInput { prefix: u64, position: usize },

    /// K-mers given to the stream writer are not in ascending order
    #[error("K-mers out of order: {previous} then {current}")]
    UnsortedKmers { previous: String, current: String },

    /// The suffix, value and label arrays of a block differ in length
    #[error("Block arrays have mismatched lengths: {suffixes} suffixes, {values} values")]
    MismatchedBlock { suffixes: usize, values: usize },

    /// A shard beyond the number of files in the database
    #[error("Shard {0} is out of range")]
    ShardOutOfRange(u32),

    /// The requested label width is larger than the format allows
    #[error("Invalid label width: {0} - expecting at most 58 bits")]
    InvalidLabelBits(u32),
}

/// Errors raised while configuring or loading an exact lookup table
#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    /// No prefix/suffix split fits in the memory budget
    #[error("Insufficient memory: at least {required} bits needed, budget is {budget} bits")]
    InsufficientMemory { required: u64, budget: u64 },

    /// `load` was called before `configure`
    #[error("Lookup table is not configured")]
    NotConfigured,

    /// The database stream produced more k-mers than the histogram promised
    #[error("Bucket overflow at prefix {prefix}: more k-mers than counted")]
    BucketOverflow { prefix: u64 },

    /// The lookup was asked to use a different k-mer size than the database
    #[error("Incompatible k-mer size: expected k={expected}, found k={found}")]
    IncompatibleKmerSize { expected: usize, found: usize },

    /// A sequence ordinal or window offset does not fit in 32 bits
    #[error("Position out of range: sequence {seq_id}, offset {offset}")]
    PositionOverflow { seq_id: usize, offset: usize },
}

/// Errors raised by the operation arena
#[derive(thiserror::Error, Debug)]
pub enum OpError {
    /// A node references an input id that does not exist
    #[error("Node {node} references missing input {input}")]
    DanglingInput { node: usize, input: usize },

    /// The operation graph is not acyclic
    #[error("Operation graph has a cycle through node {0}")]
    Cycle(usize),

    /// A single-input label operation saw several active inputs
    #[error("Label operation {op} requires exactly one input, found {found}")]
    Arity { op: &'static str, found: usize },

    /// A compute node has no inputs
    #[error("Node {0} has no inputs")]
    NoInputs(usize),

    /// A node feeds more than one consumer
    #[error("Node {0} is used as input by more than one node")]
    SharedNode(usize),

    /// A presence selector names an input the node does not have
    #[error("Selector on node {node} references input {input}, but the node has {num_inputs} inputs")]
    SelectorInput {
        node: usize,
        input: usize,
        num_inputs: usize,
    },

    /// An input database is sharded differently from the output
    #[error("Input database {path} has {found} shards, expected {expected}")]
    ShardMismatch {
        path: String,
        expected: u32,
        found: u32,
    },
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_format_error_display() {
        let error = FormatError::InvalidMasterMagic(1, 2);
        assert_eq!(
            format!("{error}"),
            "Invalid master index magic: 0x0000000000000001 0x0000000000000002"
        );

        let error = FormatError::IncompatibleKmerSize {
            expected: 21,
            found: 31,
        };
        assert_eq!(
            format!("{error}"),
            "Incompatible k-mer size: expected k=21, database has k=31"
        );
    }

    #[test]
    fn test_error_conversion() {
        let error: Error = LookupError::InsufficientMemory {
            required: 100,
            budget: 8,
        }
        .into();
        assert!(error.is_insufficient_memory());
        assert!(!error.is_kmer_size_mismatch());

        let error: Error = FormatError::IncompatibleKmerSize {
            expected: 4,
            found: 5,
        }
        .into();
        assert!(error.is_kmer_size_mismatch());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: Error = io_error.into();
        assert!(matches!(error, Error::IoError(_)));
    }

    #[test]
    fn test_write_error_display() {
        let error = WriteError::PrefixSizeChanged {
            current: 12,
            requested: 14,
        };
        assert_eq!(
            format!("{error}"),
            "Prefix size cannot change once set: was 12, requested 14"
        );
    }
}
