//! undodb - administration tool for an undodb data directory

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use undodb::database::{Database, DatabaseConfig};
use undodb::recovery::LogRecord;
use undodb::storage::{FileManager, LogManager};

/// undodb - inspect and recover an undodb data directory
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./undodb_data")]
    data_dir: PathBuf,

    /// Block size the directory was created with
    #[arg(short, long, default_value_t = 4096)]
    block_size: usize,

    /// Log file name inside the data directory
    #[arg(short, long, default_value = "undodb.log")]
    log_file: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the directory and run restart recovery
    Recover,
    /// Print every log record, newest first
    Log {
        /// Print one JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// List the files of the directory with their block counts
    Info,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = DatabaseConfig::default()
        .with_block_size(args.block_size)
        .with_log_file(args.log_file.clone());

    match args.command {
        Command::Recover => recover(&args.data_dir, config),
        Command::Log { json } => dump_log(&args.data_dir, &config, json),
        Command::Info => info(&args.data_dir, &config),
    }
}

fn recover(data_dir: &Path, config: DatabaseConfig) -> Result<()> {
    let existed = data_dir.exists();
    let db = Database::open(data_dir, config).context("Failed to open database")?;

    match db.last_recovery() {
        Some(stats) => println!(
            "Recovered {}: scanned {} records, undid {} changes of {} transactions",
            data_dir.display(),
            stats.records_scanned,
            stats.records_undone,
            stats.transactions_undone
        ),
        None if !existed => println!("Created empty database at {}", data_dir.display()),
        None => println!("Nothing to recover in {}", data_dir.display()),
    }
    Ok(())
}

/// Reads the log directly so that dumping it never triggers recovery.
fn dump_log(data_dir: &Path, config: &DatabaseConfig, json: bool) -> Result<()> {
    let file_manager = open_existing(data_dir, config)?;
    let log_manager = LogManager::new(file_manager, &config.log_file)
        .with_context(|| format!("Failed to open log file {}", config.log_file))?;

    for bytes in log_manager.iter()? {
        let record = LogRecord::from_bytes(&bytes?)?;
        if json {
            println!("{}", serde_json::to_string(&record)?);
        } else {
            println!("{}", record);
        }
    }
    Ok(())
}

fn info(data_dir: &Path, config: &DatabaseConfig) -> Result<()> {
    let file_manager = open_existing(data_dir, config)?;

    println!("Data directory: {}", data_dir.display());
    println!("Block size: {}", file_manager.block_size());
    for name in file_manager.list_files()? {
        let blocks = file_manager.length(&name)?;
        println!("  {:<24} {:>8} blocks", name, blocks);
    }
    Ok(())
}

fn open_existing(data_dir: &Path, config: &DatabaseConfig) -> Result<Arc<FileManager>> {
    if !data_dir.is_dir() {
        bail!("Data directory does not exist: {:?}", data_dir);
    }
    let file_manager = FileManager::new(data_dir, config.block_size)
        .with_context(|| format!("Failed to open data directory {:?}", data_dir))?;
    Ok(Arc::new(file_manager))
}
