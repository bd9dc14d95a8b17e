//! Strata CLI
//!
//! Command-line interface operating directly on a Strata data directory.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use strata::{Config, Engine, WalSyncStrategy};
use tracing_subscriber::{fmt, EnvFilter};

/// Strata CLI
#[derive(Parser, Debug)]
#[command(name = "strata-cli")]
#[command(about = "CLI for the Strata key-value engine")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./strata_data")]
    data_dir: String,

    /// MemTable size limit in MB before flush
    #[arg(short = 'm', long, default_value = "4")]
    memtable_mb: usize,

    /// fsync the WAL every N writes instead of every write
    #[arg(long)]
    sync_every: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List live pairs with LOW <= key <= HIGH
    Scan {
        low: String,
        high: String,
    },

    /// Flush memtables to segments
    Flush,

    /// Compact all segments into one
    Compact,

    /// Print engine statistics
    Stats,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,strata=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let wal_sync_strategy = match args.sync_every {
        Some(count) => WalSyncStrategy::EveryNEntries { count },
        None => WalSyncStrategy::EveryWrite,
    };
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .memtable_size_limit(args.memtable_mb * 1024 * 1024)
        .wal_sync_strategy(wal_sync_strategy)
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(&engine, args.command);
    let closed = engine.close();

    match outcome.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(engine: &Engine, command: Commands) -> strata::Result<()> {
    match command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan { low, high } => {
            for pair in engine.scan(low.as_bytes(), high.as_bytes())? {
                let (key, value) = pair?;
                println!(
                    "{} = {}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Commands::Flush => {
            engine.flush()?;
            println!("OK");
        }
        Commands::Compact => match engine.compact()? {
            Some(summary) => println!(
                "compacted {:?} into segment {} ({} records, {} tombstones dropped)",
                summary.input_generations,
                summary.output_generation,
                summary.records_written,
                summary.tombstones_dropped
            ),
            None => println!("nothing to compact"),
        },
        Commands::Stats => {
            let stats = engine.stats();
            println!("last sequence:     {}", stats.last_sequence);
            println!("segments:          {} {:?}", stats.segment_count, stats.segment_generations);
            println!("segment bytes:     {}", stats.segment_bytes);
            println!("segment records:   {}", stats.segment_records);
            println!("segment tombstones: {}", stats.segment_tombstones);
            println!("memtable entries:  {}", stats.memtable_entries);
            println!("memtable bytes:    {}", stats.memtable_bytes);
            println!("frozen memtables:  {}", stats.frozen_memtables);
        }
    }
    Ok(())
}
