use clap::{ArgAction, Parser, Subcommand};
use massset::{
    BytesPickler, MassSet, MassSetBuffer, MassSetBuilder, MassSetHasher, MassSetHeader,
    PicklerConfig, TextEncoding, TextPickler, DEFAULT_LOAD_FACTOR,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Error, ErrorKind, Result, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    prelude::*,
    registry::Registry,
};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level_filter = init_tracing(cli.quiet, cli.verbose)?;
    debug!(
        "starting {} {}, log level: {level_filter}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    match cli.command {
        Command::Build(args) => run_build(args),
        Command::Read(args) => run_read(args),
        Command::Probe(args) => run_probe(args),
        Command::Info(args) => run_info(args),
    }
}

fn init_tracing(quiet: bool, verbose: u8) -> Result<LevelFilter> {
    let level_filter = if quiet {
        LevelFilter::ERROR
    } else {
        match verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    // the library logs through the log crate
    tracing_log::LogTracer::init().map_err(Error::other)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("MASSSET_LOG")
        .from_env_lossy();

    let subscriber = Registry::default().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .compact(),
    );
    tracing::subscriber::set_global_default(subscriber).map_err(Error::other)?;

    Ok(level_filter)
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "massset utility for creating and querying massset files",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    /// Only report errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Turn on verbose output. Supply -v multiple times to increase verbosity.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a massset file from a text file with one item per line
    Build(BuildArgs),
    /// Print every item of a massset file, one per line
    Read(ReadArgs),
    /// Print the given items that are members of a massset file
    Probe(ProbeArgs),
    /// Inspect a massset file and print its header
    Info(InfoArgs),
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Text file with one item per line, or "-" for stdin
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Path to the massset file to produce, or "-" for stdout
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Target ratio of items to buckets
    #[arg(long, value_name = "F", default_value_t = DEFAULT_LOAD_FACTOR)]
    load_factor: f64,

    /// Hash function used for bucket routing
    #[arg(long, value_name = "NAME", default_value = "xxh3")]
    hasher: String,

    /// Seed for seeded hash functions
    #[arg(long, value_name = "SEED", default_value_t = 0)]
    seed: u64,

    /// Character encoding of the stored items
    #[arg(long, value_name = "ENC", default_value_t = TextEncoding::Utf8)]
    encoding: TextEncoding,

    /// Optional override for writer buffer size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = 16 << 20)]
    buffer_size: usize,
}

#[derive(clap::Args)]
struct ReadArgs {
    /// Path to the massset file
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

#[derive(clap::Args)]
struct ProbeArgs {
    /// Path to the massset file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Items to look up; read from stdin, one per line, when omitted
    #[arg(value_name = "NEEDLE")]
    needles: Vec<String>,
}

#[derive(clap::Args)]
struct InfoArgs {
    /// Path to the massset file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Optional bucket index to inspect
    #[arg(short, long)]
    bucket: Option<usize>,
}

/// Opened set whose items can be shown as text.
enum TextualSet {
    Text(MassSet<TextPickler>),
    Bytes(MassSet<BytesPickler>),
}

impl TextualSet {
    fn open(path: &Path) -> Result<Self> {
        let buffer = MassSetBuffer::map_path(path)?;
        let header = MassSetHeader::from_bytes(&buffer)?;
        match header.pickler() {
            PicklerConfig::Text { .. } => Ok(Self::Text(MassSet::from_buffer(buffer)?)),
            PicklerConfig::Bytes { .. } => Ok(Self::Bytes(MassSet::from_buffer(buffer)?)),
            other => Err(Error::new(
                ErrorKind::InvalidData,
                format!("items of the {} pickler cannot be shown as text", other.name()),
            )),
        }
    }

    fn contains(&self, needle: &str) -> Result<bool> {
        let found = match self {
            Self::Text(set) => set.contains(&needle.to_string())?,
            Self::Bytes(set) => set.contains(&needle.as_bytes().to_vec())?,
        };
        Ok(found)
    }

    fn bucket(&self, n: usize) -> Result<Vec<String>> {
        let items = match self {
            Self::Text(set) => set.get_bucket(n)?.to_vec(),
            Self::Bytes(set) => set
                .get_bucket(n)?
                .iter()
                .map(|item| String::from_utf8_lossy(item).into_owned())
                .collect(),
        };
        Ok(items)
    }

    fn write_items<W: Write>(&self, out: &mut W) -> Result<u64> {
        let mut count = 0;
        match self {
            Self::Text(set) => {
                for item in set {
                    writeln!(out, "{}", item?)?;
                    count += 1;
                }
            }
            Self::Bytes(set) => {
                for item in set {
                    writeln!(out, "{}", String::from_utf8_lossy(item?))?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

fn is_stdio(path: &Path) -> bool {
    path == Path::new("-")
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let reader: Box<dyn BufRead> = if is_stdio(path) {
        Box::new(io::stdin().lock())
    } else {
        Box::new(BufReader::new(File::open(path)?))
    };
    reader.lines().collect()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Error::other(format!("Failed to format JSON: {e}")))
}

fn run_build(args: BuildArgs) -> Result<ExitCode> {
    let items = read_lines(&args.input)?;
    let hasher = MassSetHasher::from_name(&args.hasher, args.seed)?;
    let builder = MassSetBuilder::default()
        .with_hasher(hasher)
        .with_load_factor(args.load_factor)
        .with_writer_buffer_size(args.buffer_size);
    let pickler = TextPickler::new(args.encoding);

    info!("Building massset from {} lines", items.len());
    let info = if is_stdio(&args.output) {
        builder.build(io::stdout().lock(), pickler, items)?
    } else {
        builder.build(File::create(&args.output)?, pickler, items)?
    };

    let json = to_json(&info)?;
    if is_stdio(&args.output) {
        eprintln!("{}", json);
    } else {
        println!("{}", json);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_read(args: ReadArgs) -> Result<ExitCode> {
    let set = TextualSet::open(&args.input)?;
    let mut out = io::BufWriter::new(io::stdout().lock());
    let count = set.write_items(&mut out)?;
    out.flush()?;
    debug!("Printed {count} items");
    Ok(ExitCode::SUCCESS)
}

fn run_probe(args: ProbeArgs) -> Result<ExitCode> {
    let set = TextualSet::open(&args.input)?;
    let needles = if args.needles.is_empty() {
        read_lines(Path::new("-"))?
    } else {
        args.needles
    };

    let mut out = io::stdout().lock();
    let mut matched = 0;
    for needle in &needles {
        if set.contains(needle)? {
            writeln!(out, "{}", needle)?;
            matched += 1;
        }
    }
    info!("{matched} of {} needles matched", needles.len());

    if matched == 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn run_info(args: InfoArgs) -> Result<ExitCode> {
    let buffer = MassSetBuffer::map_path(&args.input)?;
    let header = MassSetHeader::from_bytes(&buffer)?;
    println!("{}", to_json(&header)?);

    if let Some(bucket_index) = args.bucket {
        let bucket_count = header.bucket_count();
        if bucket_index as u64 >= bucket_count {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("Bucket index {bucket_index} out of range >= {bucket_count}"),
            ));
        }
        drop(buffer);
        let set = TextualSet::open(&args.input)?;
        let items = set.bucket(bucket_index)?;
        println!("Bucket {} items:\n{}", bucket_index, to_json(&items)?);
    }

    Ok(ExitCode::SUCCESS)
}
