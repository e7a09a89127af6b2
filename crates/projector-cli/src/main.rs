//! Projector CLI - Headless playback orchestration driver
//!
//! Features:
//! - Scripted playback scenarios against simulated adapters
//! - Retry backoff schedules
//! - Failure message classification

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;
mod output;
mod scenario;

/// Projector CLI - Playback orchestration toolkit
#[derive(Parser)]
#[command(name = "projector")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Drive the Projector playback engine headlessly", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text", global = true)]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted playback scenario
    Simulate {
        /// Scenario JSON file
        scenario: PathBuf,

        /// Engine configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seed for retry jitter
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the retry delay schedule of a policy
    Backoff {
        /// Base delay in milliseconds
        #[arg(long, default_value = "500")]
        base: u64,

        /// Maximum delay in milliseconds
        #[arg(long, default_value = "30000")]
        max: u64,

        /// Exponential multiplier
        #[arg(long, default_value = "2.0")]
        multiplier: f64,

        /// Jitter ratio (0-1)
        #[arg(long, default_value = "0.2")]
        jitter: f64,

        /// Number of retries
        #[arg(long, default_value = "5")]
        attempts: u32,

        /// Seed for jitter
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Classify failure messages into retry categories
    Classify {
        /// Messages to classify
        #[arg(required = true)]
        messages: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(level)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(level)
            .with_writer(std::io::stderr)
            .init(),
    }

    match cli.command {
        Commands::Simulate { scenario, config, seed } => {
            commands::simulate(&scenario, config.as_deref(), seed, &cli.format).await?;
        }
        Commands::Backoff {
            base,
            max,
            multiplier,
            jitter,
            attempts,
            seed,
        } => {
            commands::backoff(base, max, multiplier, jitter, attempts, seed, &cli.format)?;
        }
        Commands::Classify { messages } => {
            commands::classify(&messages, &cli.format)?;
        }
    }

    Ok(())
}
