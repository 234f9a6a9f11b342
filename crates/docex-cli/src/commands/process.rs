//! Process command - extract fields from a single document.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use docex_core::models::document::DocumentType;
use docex_core::{DocexConfig, FileTextSource, Pipeline};

use super::output::{OutputFormat, format_result, print_diagnostics};
use crate::backend::Backend;

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input file (PDF, image or text)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Document type; skips classification
    #[arg(short = 't', long = "type", value_parser = super::parse_document_type)]
    document_type: Option<DocumentType>,

    /// Number of self-consistency runs
    #[arg(long)]
    runs: Option<usize>,

    /// Single extraction run (same as --runs 1)
    #[arg(long, conflicts_with = "runs")]
    no_self_consistency: bool,

    /// Low-confidence threshold (0.0 - 1.0)
    #[arg(long)]
    threshold: Option<f64>,

    /// Apply suggested corrections to the output
    #[arg(long)]
    apply_corrections: bool,

    /// Show confidence summary
    #[arg(long)]
    show_confidence: bool,

    /// Give up on model calls after this many seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,
}

/// Overrides shared by `process` and `batch`.
pub struct Overrides {
    pub runs: Option<usize>,
    pub threshold: Option<f64>,
    pub apply_corrections: bool,
}

/// Build a pipeline from the config, the model backend and command-line overrides.
pub fn build_pipeline(
    config: &DocexConfig,
    responses: Option<&Path>,
    overrides: &Overrides,
) -> anyhow::Result<Pipeline<Backend>> {
    let backend = Backend::build(&config.model, responses)?;
    let mut pipeline = Pipeline::from_config(config, Arc::new(backend))?
        .with_auto_correct(overrides.apply_corrections);
    if let Some(runs) = overrides.runs {
        pipeline = pipeline.with_runs(runs)?;
    }
    if let Some(threshold) = overrides.threshold {
        pipeline = pipeline.with_threshold(threshold)?;
    }
    Ok(pipeline)
}

pub async fn run(
    args: ProcessArgs,
    config_path: Option<&str>,
    responses: Option<&Path>,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = super::load_config(config_path)?;

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let overrides = Overrides {
        runs: if args.no_self_consistency {
            Some(1)
        } else {
            args.runs
        },
        threshold: args.threshold,
        apply_corrections: args.apply_corrections,
    };
    let pipeline = build_pipeline(&config, responses, &overrides)?;
    let source = FileTextSource::from_config(&config.ingest)?;

    info!("Processing file: {}", args.input.display());

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(format!("Extracting {}...", args.input.display()));

    let deadline = args
        .timeout
        .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    let outcome = pipeline
        .process_path(&source, &args.input, args.document_type, deadline)
        .await;
    pb.finish_and_clear();
    let result = outcome?;

    let output = format_result(&result, args.format)?;

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    print_diagnostics(&result);

    if args.show_confidence {
        let summary = pipeline.review().confidence().summary(&result.confidence);
        eprintln!();
        eprintln!(
            "{} Overall confidence: {:.1}% ({} fields: {} high, {} medium, {} low)",
            style("ℹ").blue(),
            summary.overall_confidence * 100.0,
            summary.field_count,
            summary.high,
            summary.medium,
            summary.low
        );
        if !result.confidence.low_confidence_fields.is_empty() {
            let fields: Vec<&str> = result
                .confidence
                .low_confidence_fields
                .iter()
                .map(String::as_str)
                .collect();
            eprintln!("{} Low confidence: {}", style("ℹ").blue(), fields.join(", "));
        }
    }

    debug!("Total processing time: {:?}", start.elapsed());

    Ok(())
}
