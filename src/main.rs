use std::{
    fs, io,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kmerdb::{
    db::{ParallelReader, ShardProcessor},
    lookup::{ExactLookup, LookupConfig},
    DatabaseReader, Kmer, KmerCounter, KmerRecord, KmerSize, WriterBuilder,
};
use parking_lot::Mutex;

mod logging;

#[derive(Parser)]
#[command(name = "kmerdb")]
#[command(about = "Count, inspect and query sharded k-mer databases", long_about = None)]
struct Cli {
    /// Show block-level progress
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count ACGT sequences into a new database
    Count {
        /// K-mer size (1 to 64)
        kmer_size: usize,

        /// Output database directory
        output: PathBuf,

        /// Sequences, or files with one sequence per line
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Threads to use [0: auto]
        #[arg(short = 'T', long, default_value_t = 0)]
        threads: usize,
    },

    /// Print the value histogram
    Histogram { db: PathBuf },

    /// Print summary statistics
    Statistics { db: PathBuf },

    /// Print ploidy peaks
    Ploidy { db: PathBuf },

    /// Print kmer<TAB>value lines
    Print {
        db: PathBuf,

        /// Threads to use [0: auto]; with more than one, shards are printed
        /// in completion order
        #[arg(short = 'T', long, default_value_t = 1)]
        threads: usize,
    },

    /// Print the value of each k-mer
    Lookup {
        db: PathBuf,

        #[arg(required = true)]
        kmers: Vec<String>,
    },
}

/// Reads sequences from a plain-text file (one per line) or takes the
/// argument itself as a sequence.
fn load_sequences(arg: &str) -> Result<Vec<Vec<u8>>> {
    let path = Path::new(arg);
    if path.is_file() {
        let text = fs::read(path).with_context(|| format!("reading {arg}"))?;
        Ok(text
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
            .filter(|line| !line.is_empty())
            .collect())
    } else {
        Ok(vec![arg.as_bytes().to_vec()])
    }
}

fn count(k: usize, out: &Path, inputs: &[String], threads: usize) -> Result<()> {
    let size = KmerSize::new(k)?;
    let mut counter = KmerCounter::new(size);
    for input in inputs {
        for seq in load_sequences(input)? {
            counter.add_sequence(&seq);
        }
    }
    log::info!("counted {} {size}-mer occurrences", counter.len());
    let hist = counter.write_database(WriterBuilder::default(), out, threads)?;
    eprintln!(
        "Wrote {} distinct {size}-mers ({} total) to {}",
        hist.num_distinct(),
        hist.num_total(),
        out.display()
    );
    Ok(())
}

fn open(db: &Path) -> Result<DatabaseReader> {
    DatabaseReader::open_unchecked(db)
        .with_context(|| format!("opening database {}", db.display()))
}

fn histogram(db: &Path) -> Result<()> {
    let mut reader = open(db)?;
    let mut stdout = io::BufWriter::new(io::stdout());
    reader.load_statistics().report_histogram(&mut stdout)?;
    stdout.flush()?;
    Ok(())
}

fn statistics(db: &Path) -> Result<()> {
    let mut reader = open(db)?;
    let size = reader.kmer_size();
    let mut stdout = io::BufWriter::new(io::stdout());
    reader.load_statistics().report_statistics(&mut stdout, size)?;
    stdout.flush()?;
    Ok(())
}

fn ploidy(db: &Path) -> Result<()> {
    let mut reader = open(db)?;
    let peaks = reader.load_statistics().ploidy_peaks();
    let mut stdout = io::BufWriter::new(io::stdout());
    peaks.report(&mut stdout)?;
    stdout.flush()?;
    Ok(())
}

type BoxedWriter = Box<dyn io::Write + Send>;

/// Formats records of one shard and writes them out when the shard ends.
#[derive(Clone)]
struct Printer {
    size: KmerSize,
    l_buf: Vec<u8>,
    l_records: usize,

    records: Arc<Mutex<usize>>,
    writer: Arc<Mutex<BoxedWriter>>,
}
impl Printer {
    fn new(size: KmerSize, writer: BoxedWriter) -> Self {
        Self {
            size,
            l_buf: Vec::new(),
            l_records: 0,
            records: Arc::new(Mutex::new(0)),
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    fn n_records(&self) -> usize {
        *self.records.lock()
    }
}
impl ShardProcessor for Printer {
    fn process_record(&mut self, record: &KmerRecord) -> kmerdb::Result<()> {
        writeln!(
            self.l_buf,
            "{}\t{}",
            record.kmer.as_string(self.size),
            record.value
        )?;
        self.l_records += 1;
        Ok(())
    }

    fn on_shard_complete(&mut self, _shard: u32) -> kmerdb::Result<()> {
        {
            let mut writer = self.writer.lock();
            writer.write_all(&self.l_buf)?;
            writer.flush()?;
        }
        self.l_buf.clear();

        *self.records.lock() += self.l_records;
        self.l_records = 0;
        Ok(())
    }
}

/// Prints every k-mer. With one thread the output is sorted; with more,
/// shards are printed in completion order.
fn print(db: &Path, threads: usize) -> Result<()> {
    let reader = open(db)?;
    let printer = Printer::new(reader.kmer_size(), Box::new(io::stdout()));
    reader.process_parallel(printer.clone(), threads)?;
    log::info!("printed {} k-mers", printer.n_records());
    Ok(())
}

fn lookup(db: &Path, kmers: &[String]) -> Result<()> {
    let size = open(db)?.kmer_size();
    let config = LookupConfig::default();
    let mut table = ExactLookup::new(db, size, config)?;
    table.configure(&config)?;
    table.load()?;

    let mut stdout = io::BufWriter::new(io::stdout());
    for text in kmers {
        let kmer = Kmer::parse(text, size)?;
        let value = table
            .exists_value(kmer)
            .or_else(|| table.exists_value(kmer.canonical(size)))
            .unwrap_or(0);
        writeln!(stdout, "{text}\t{value}")?;
    }
    stdout.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    logging::init_logger(args.verbose);

    match args.command {
        Commands::Count {
            kmer_size,
            output,
            inputs,
            threads,
        } => count(kmer_size, &output, &inputs, threads),
        Commands::Histogram { db } => histogram(&db),
        Commands::Statistics { db } => statistics(&db),
        Commands::Ploidy { db } => ploidy(&db),
        Commands::Print { db, threads } => print(&db, threads),
        Commands::Lookup { db, kmers } => lookup(&db, &kmers),
    }
}
