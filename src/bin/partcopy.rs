//! partcopy CLI
//!
//! Resumable copy of large objects, plus ledger inspection

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use partcopy::{
    collapse_runs, parse_size, DirDestination, FileSource, Ledger, MultipartDestination,
    Orchestrator, RangeSource, SqliteLedger, TransferConfig, TransferId, TransferPlan,
    TransferSnapshot,
};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "partcopy")]
#[command(about = "Resumable multi-part copy of very large objects")]
struct Args {
    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Ledger database recording per-part progress
    #[arg(short = 'l', long, default_value = "partcopy-ledger.db")]
    ledger: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy (or resume copying) SOURCE to DEST
    Copy {
        /// Local file or s3://bucket/key
        source: String,

        /// Local file path or s3://bucket/key
        dest: String,

        /// Part size, e.g. 64MiB [default: from config, 96MiB]
        #[arg(long)]
        part_size: Option<String>,

        /// Split into this many parts instead of a fixed part size
        #[arg(long, conflicts_with = "part_size")]
        parts: Option<u32>,

        /// Reader threads
        #[arg(long)]
        readers: Option<usize>,

        /// Writer threads
        #[arg(long)]
        writers: Option<usize>,

        /// Attempts per part before the transfer aborts
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Directory for disk-spooled parts
        #[arg(long)]
        spool_dir: Option<PathBuf>,

        /// JSON snapshot from an earlier `export`, used when the ledger is empty
        #[arg(long)]
        prior: Option<PathBuf>,
    },

    /// Show ledger state of one transfer, or of all transfers
    Status {
        source: Option<String>,
        dest: Option<String>,
    },

    /// Export a transfer's ledger state as a JSON snapshot
    Export {
        source: String,
        dest: String,

        /// Output file [default: stdout]
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
}

/// A parsed SOURCE or DEST argument
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Local(PathBuf),
    S3 { bucket: String, key: String },
}

impl Endpoint {
    fn parse(text: &str) -> anyhow::Result<Self> {
        if let Some(rest) = text.strip_prefix("s3://") {
            let (bucket, key) = rest
                .split_once('/')
                .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
                .ok_or_else(|| anyhow!("Invalid S3 location '{}', expected s3://bucket/key", text))?;
            return Ok(Endpoint::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(Endpoint::Local(PathBuf::from(text)))
    }
}

fn load_config(args: &Args) -> anyhow::Result<TransferConfig> {
    match &args.config {
        Some(path) => TransferConfig::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(TransferConfig::default()),
    }
}

/// Split a local destination into a staging root and object key
fn local_destination(path: &Path) -> anyhow::Result<(DirDestination, String)> {
    let key = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("Destination {} has no file name", path.display()))?
        .to_string();
    let root = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((DirDestination::new(root)?, key))
}

#[cfg(feature = "s3")]
fn s3_context(config: &TransferConfig) -> anyhow::Result<partcopy::S3Context> {
    let options = partcopy::S3Options {
        region: std::env::var("AWS_REGION").ok(),
        endpoint: std::env::var("PARTCOPY_S3_ENDPOINT").ok(),
        force_path_style: std::env::var("PARTCOPY_S3_PATH_STYLE").is_ok(),
        operation_timeout: Some(config.part_timeout()),
    };
    Ok(partcopy::S3Context::connect(&options)?)
}

#[cfg_attr(not(feature = "s3"), allow(unused_variables))]
fn open_source(
    endpoint: &Endpoint,
    config: &TransferConfig,
) -> anyhow::Result<(Box<dyn RangeSource>, String)> {
    match endpoint {
        Endpoint::Local(path) => {
            let key = path
                .to_str()
                .ok_or_else(|| anyhow!("Source path {} is not UTF-8", path.display()))?;
            Ok((Box::new(FileSource::new()), key.to_string()))
        }
        #[cfg(feature = "s3")]
        Endpoint::S3 { bucket, key } => Ok((
            Box::new(partcopy::S3Source::new(s3_context(config)?, bucket.clone())),
            key.clone(),
        )),
        #[cfg(not(feature = "s3"))]
        Endpoint::S3 { .. } => bail!("S3 locations need partcopy built with the `s3` feature"),
    }
}

#[cfg_attr(not(feature = "s3"), allow(unused_variables))]
fn open_destination(
    endpoint: &Endpoint,
    config: &TransferConfig,
) -> anyhow::Result<(Box<dyn MultipartDestination>, String)> {
    match endpoint {
        Endpoint::Local(path) => {
            let (destination, key) = local_destination(path)?;
            Ok((Box::new(destination), key))
        }
        #[cfg(feature = "s3")]
        Endpoint::S3 { bucket, key } => Ok((
            Box::new(partcopy::S3Destination::new(s3_context(config)?, bucket.clone())),
            key.clone(),
        )),
        #[cfg(not(feature = "s3"))]
        Endpoint::S3 { .. } => bail!("S3 locations need partcopy built with the `s3` feature"),
    }
}

/// Ledger keys for a SOURCE/DEST pair, as `copy` derives them
fn transfer_keys(source: &str, dest: &str) -> anyhow::Result<(String, String)> {
    let source_key = match Endpoint::parse(source)? {
        Endpoint::Local(path) => path.to_string_lossy().into_owned(),
        Endpoint::S3 { key, .. } => key,
    };
    let dest_key = match Endpoint::parse(dest)? {
        Endpoint::Local(path) => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("Destination {} has no file name", dest))?,
        Endpoint::S3 { key, .. } => key,
    };
    Ok((source_key, dest_key))
}

fn print_plan(plan: &TransferPlan) {
    let record = &plan.record;
    let done: Vec<u32> = plan
        .parts
        .iter()
        .filter(|p| p.is_uploaded())
        .map(|p| p.part_number)
        .collect();

    println!("{}  {}", record.transfer_id, record.state);
    println!("  {} -> {}", record.source, record.destination);
    println!(
        "  {} bytes, part size {}, {}/{} parts uploaded ({} bytes)",
        record.total_size,
        record.part_size,
        done.len(),
        plan.parts.len(),
        plan.uploaded_bytes()
    );
    println!("  uploaded:    [{}]", collapse_runs(&done));
    println!("  outstanding: [{}]", collapse_runs(&plan.outstanding()));
    if let Some(upload_id) = &record.upload_id {
        println!("  session:     {}", upload_id);
    }
    println!("  updated:     {}", record.updated_at.to_rfc3339());
}

#[allow(clippy::too_many_arguments)]
fn run_copy(
    mut config: TransferConfig,
    ledger: &dyn Ledger,
    source: &str,
    dest: &str,
    part_size: Option<String>,
    parts: Option<u32>,
    readers: Option<usize>,
    writers: Option<usize>,
    max_attempts: Option<u32>,
    spool_dir: Option<PathBuf>,
    prior: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(size) = part_size {
        config.part_size = parse_size(&size)?;
        config.part_count = None;
    }
    if parts.is_some() {
        config.part_count = parts;
    }
    if let Some(readers) = readers {
        config.reader_threads = readers;
    }
    if let Some(writers) = writers {
        config.writer_threads = writers;
    }
    if let Some(max_attempts) = max_attempts {
        config.retry.max_attempts = max_attempts;
    }
    if spool_dir.is_some() {
        config.spool_dir = spool_dir;
    }
    config.check()?;

    let prior = match prior {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading snapshot {}", path.display()))?;
            Some(TransferSnapshot::from_json(&text)?)
        }
        None => None,
    };

    let (source_store, source_key) = open_source(&Endpoint::parse(source)?, &config)?;
    let (dest_store, dest_key) = open_destination(&Endpoint::parse(dest)?, &config)?;

    let orchestrator = Orchestrator::new(&config, ledger, source_store.as_ref(), dest_store.as_ref());
    let summary = orchestrator.run(&source_key, &dest_key, prior.as_ref())?;

    info!(
        "Copied {} bytes ({} parts, {} resumed) in {:.2?}",
        summary.total_size, summary.part_count, summary.parts_skipped, summary.elapsed
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let ledger = SqliteLedger::open(&args.ledger)
        .with_context(|| format!("opening ledger {}", args.ledger.display()))?;

    match args.command {
        Command::Copy {
            source,
            dest,
            part_size,
            parts,
            readers,
            writers,
            max_attempts,
            spool_dir,
            prior,
        } => run_copy(
            config,
            &ledger,
            &source,
            &dest,
            part_size,
            parts,
            readers,
            writers,
            max_attempts,
            spool_dir,
            prior,
        ),

        Command::Status { source, dest } => {
            match (source, dest) {
                (Some(source), Some(dest)) => {
                    let (source_key, dest_key) = transfer_keys(&source, &dest)?;
                    let id = TransferId::derive(&source_key, &dest_key);
                    match ledger.load_plan(&id)? {
                        Some(plan) => print_plan(&plan),
                        None => println!("No transfer recorded for {} -> {}", source, dest),
                    }
                }
                (None, None) => {
                    let records = ledger.transfers()?;
                    if records.is_empty() {
                        println!("No transfers recorded in {}", args.ledger.display());
                    }
                    for record in records {
                        if let Some(plan) = ledger.load_plan(&record.transfer_id)? {
                            print_plan(&plan);
                        }
                    }
                }
                _ => bail!("status takes both SOURCE and DEST, or neither"),
            }
            Ok(())
        }

        Command::Export {
            source,
            dest,
            output,
        } => {
            let (source_key, dest_key) = transfer_keys(&source, &dest)?;
            let id = TransferId::derive(&source_key, &dest_key);
            let snapshot = ledger
                .snapshot(&id)?
                .ok_or_else(|| anyhow!("No transfer recorded for {} -> {}", source, dest))?;
            let json = snapshot.to_json()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!("Exported transfer {} to {}", id, path.display());
                }
                None => println!("{}", json),
            }
            Ok(())
        }
    }
}
