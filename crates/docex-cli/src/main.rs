//! CLI application for schema-guided document extraction.

mod backend;
mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::{batch, config, process, revalidate, schemas};

/// docex - Extract structured fields from invoices, bills and prescriptions
#[derive(Parser)]
#[command(name = "docex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Answer model calls from a JSON array of responses instead of the API
    #[arg(long, global = true, value_name = "FILE")]
    responses: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract fields from a single document
    Process(process::ProcessArgs),

    /// Extract fields from multiple documents
    Batch(batch::BatchArgs),

    /// Apply manual edits to a saved result and re-run validation
    Revalidate(revalidate::RevalidateArgs),

    /// Inspect extraction schemas
    Schemas(schemas::SchemasArgs),

    /// Manage configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.as_deref();
    let responses = cli.responses.as_deref();
    match cli.command {
        Commands::Process(args) => process::run(args, config_path, responses).await,
        Commands::Batch(args) => batch::run(args, config_path, responses).await,
        Commands::Revalidate(args) => revalidate::run(args, config_path),
        Commands::Schemas(args) => schemas::run(args, config_path),
        Commands::Config(args) => config::run(args),
    }
}
