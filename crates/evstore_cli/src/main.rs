//! EvStore CLI
//!
//! Command-line tools for EvStore store management.
//!
//! # Commands
//!
//! - `inspect` - Display chunk, stream and checkpoint information
//! - `verify` - Verify every record of every chunk
//! - `dump` - Dump raw log records for debugging
//! - `read` - Read a stream or the whole log
//! - `scavenge` - Reclaim space from sealed chunks

mod commands;

use clap::{Parser, Subcommand};
use commands::{CliError, OutputFormat};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// EvStore command-line store tools.
#[derive(Parser)]
#[command(name = "evstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display chunk, stream and checkpoint information
    Inspect {
        /// Show every chunk
        #[arg(short, long)]
        chunks: bool,

        /// Show every stream
        #[arg(short, long)]
        streams: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Verify every record of every chunk
    Verify,

    /// Dump raw log records for debugging
    Dump {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Start from this log position
        #[arg(short = 'o', long, default_value = "0")]
        from: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Read a stream, or the whole log when no stream is given
    Read {
        /// Stream to read
        stream: Option<String>,

        /// First event number (stream reads; -1 is the last event)
        #[arg(long, allow_hyphen_values = true)]
        from: Option<i64>,

        /// Maximum number of events
        #[arg(short, long, default_value = "100")]
        limit: usize,

        /// Read newest first
        #[arg(short, long)]
        backward: bool,

        /// Follow link events to their targets
        #[arg(short, long)]
        resolve: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Reclaim space from sealed chunks
    Scavenge {
        /// Keep only the newest N events of each stream
        #[arg(long)]
        max_count: Option<u64>,

        /// Drop events older than this many seconds
        #[arg(long)]
        max_age_secs: Option<u64>,

        /// Keep link events whose target is gone
        #[arg(long)]
        keep_unresolved_links: bool,

        /// Seal the open chunk first so its records are scavenged too
        #[arg(long)]
        complete_chunk: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect {
            chunks,
            streams,
            format,
        } => {
            let path = cli.path.ok_or(CliError::PathRequired("inspect"))?;
            commands::inspect::run(&path, chunks, streams, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or(CliError::PathRequired("verify"))?;
            commands::verify::run(&path)?;
        }
        Commands::Dump {
            limit,
            from,
            format,
        } => {
            let path = cli.path.ok_or(CliError::PathRequired("dump"))?;
            commands::dump::run(&path, from, limit, format)?;
        }
        Commands::Read {
            stream,
            from,
            limit,
            backward,
            resolve,
            format,
        } => {
            let path = cli.path.ok_or(CliError::PathRequired("read"))?;
            let options = commands::read::ReadOptions {
                stream,
                from,
                limit,
                backward,
                resolve,
            };
            commands::read::run(&path, &options, format)?;
        }
        Commands::Scavenge {
            max_count,
            max_age_secs,
            keep_unresolved_links,
            complete_chunk,
            format,
        } => {
            let path = cli.path.ok_or(CliError::PathRequired("scavenge"))?;
            let options = commands::scavenge::ScavengeOptions {
                max_count,
                max_age_secs,
                keep_unresolved_links,
                complete_chunk,
            };
            commands::scavenge::run(&path, &options, format)?;
        }
        Commands::Version => {
            println!("EvStore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("EvStore Core v{}", evstore_core::VERSION);
        }
    }

    Ok(())
}
