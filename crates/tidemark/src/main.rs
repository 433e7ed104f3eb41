//! Tidemark CLI.
//!
//! Usage:
//!     tidemark --config tidemark.toml run [--dry-run]
//!     tidemark --config tidemark.toml status

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tidemark::config::Config;
use tidemark::extract::FormatRegistry;
use tidemark::import::Importer;
use tidemark_store::WatermarkStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tidemark", about = "Incremental importer of time-stamped files into InfluxDB")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "tidemark.toml", env = "TIDEMARK_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import new files for every configured source
    Run {
        /// Detect, extract and batch, but send nothing and keep watermarks
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the persisted watermark of every source
    Status,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tidemark=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match real_main() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn real_main() -> Result<bool> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run { dry_run } => run_import(&config, dry_run),
        Commands::Status => print_status(&config),
    }
}

fn run_import(config: &Config, dry_run: bool) -> Result<bool> {
    let registry = FormatRegistry::builtin();
    let store = WatermarkStore::open(&config.import.status_file)?;
    let importer = Importer::new(config, &registry, &store, &config.database);

    let report = importer
        .run(dry_run)
        .context("import run aborted")?;
    Ok(report.fully_succeeded())
}

fn print_status(config: &Config) -> Result<bool> {
    let store = WatermarkStore::open(&config.import.status_file)?;
    let watermarks = store.all()?;

    if watermarks.is_empty() {
        println!("no sources imported yet");
        return Ok(true);
    }
    for (source, mtime) in watermarks {
        println!("{source}\t{}", mtime.to_rfc3339());
    }
    Ok(true)
}
