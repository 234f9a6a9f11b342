//! Batch processing command for multiple documents.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use console::style;
use futures_util::stream::{self, StreamExt};
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, warn};

use docex_core::models::document::DocumentType;
use docex_core::{DocumentFormat, ExtractionResult, FileTextSource};

use super::output::{OutputFormat, format_result};
use super::process::{Overrides, build_pipeline};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input files or glob pattern
    #[arg(required = true)]
    input: String,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format for each file
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Number of documents processed concurrently
    #[arg(short = 'j', long, default_value = "4")]
    jobs: usize,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,

    /// Document type for every file; skips classification
    #[arg(short = 't', long = "type", value_parser = super::parse_document_type)]
    document_type: Option<DocumentType>,

    /// Number of self-consistency runs
    #[arg(long)]
    runs: Option<usize>,

    /// Apply suggested corrections to the outputs
    #[arg(long)]
    apply_corrections: bool,
}

/// Result of processing a single file.
struct FileOutcome {
    path: PathBuf,
    result: Option<ExtractionResult>,
    error: Option<String>,
    processing_time_ms: u64,
}

pub async fn run(
    args: BatchArgs,
    config_path: Option<&str>,
    responses: Option<&Path>,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = super::load_config(config_path)?;

    let mut files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| p.is_file() && DocumentFormat::from_path(p).is_ok())
        .collect();
    files.sort();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let overrides = Overrides {
        runs: args.runs,
        threshold: None,
        apply_corrections: args.apply_corrections,
    };
    let pipeline = build_pipeline(&config, responses, &overrides)?;
    let source = FileTextSource::from_config(&config.ingest)?;

    let overall_pb = ProgressBar::new(files.len() as u64);
    overall_pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
            .progress_chars("=>-"),
    );

    let hint = args.document_type;
    let mut pending = stream::iter(files)
        .map(|path| {
            let pipeline = &pipeline;
            let source = &source;
            async move {
                let file_start = Instant::now();
                let outcome = pipeline
                    .process_path(source, &path, hint, None)
                    .await;
                (path, outcome, file_start.elapsed().as_millis() as u64)
            }
        })
        .buffer_unordered(args.jobs.max(1));

    let mut outcomes = Vec::new();
    while let Some((path, outcome, processing_time_ms)) = pending.next().await {
        overall_pb.inc(1);
        match outcome {
            Ok(result) => outcomes.push(FileOutcome {
                path,
                result: Some(result),
                error: None,
                processing_time_ms,
            }),
            Err(e) => {
                let error_msg = e.to_string();
                if !args.continue_on_error {
                    overall_pb.abandon();
                    error!("Failed to process {}: {}", path.display(), error_msg);
                    anyhow::bail!("Processing {} failed: {}", path.display(), error_msg);
                }
                warn!("Failed to process {}: {}", path.display(), error_msg);
                outcomes.push(FileOutcome {
                    path,
                    result: None,
                    error: Some(error_msg),
                    processing_time_ms,
                });
            }
        }
    }
    drop(pending);
    overall_pb.finish_and_clear();
    outcomes.sort_by(|a, b| a.path.cmp(&b.path));

    if let Some(output_dir) = &args.output_dir {
        for outcome in &outcomes {
            let Some(result) = &outcome.result else {
                continue;
            };
            let output_name = outcome
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("document");
            let output_path =
                output_dir.join(format!("{}.{}", output_name, args.format.extension()));
            fs::write(&output_path, format_result(result, args.format)?)?;
            debug!("Wrote output to {}", output_path.display());
        }
    }

    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));

        write_summary(&summary_path, &outcomes)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    let failed: Vec<&FileOutcome> = outcomes.iter().filter(|o| o.error.is_some()).collect();
    let needs_review = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref())
        .filter(|r| !r.is_valid())
        .count();

    println!();
    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        outcomes.len(),
        start.elapsed()
    );
    println!(
        "   {} successful, {} need review, {} failed",
        style(outcomes.len() - failed.len()).green(),
        style(needs_review).yellow(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for outcome in &failed {
            println!(
                "  - {}: {}",
                outcome.path.display(),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

fn write_summary(path: &Path, outcomes: &[FileOutcome]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "document_type",
        "overall_confidence",
        "fields",
        "low_confidence_fields",
        "errors",
        "warnings",
        "retry_count",
        "processing_time_ms",
        "error",
    ])?;

    for outcome in outcomes {
        let filename = outcome
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        let time = outcome.processing_time_ms.to_string();

        match &outcome.result {
            Some(result) => {
                let status = if result.is_valid() { "success" } else { "review" };
                wtr.write_record([
                    filename,
                    status,
                    result.document_type.as_str(),
                    &format!("{:.3}", result.confidence.overall_score),
                    &result.record.len().to_string(),
                    &result.confidence.low_confidence_fields.len().to_string(),
                    &result.errors().count().to_string(),
                    &result.warnings_only().count().to_string(),
                    &result.retry_count.to_string(),
                    &time,
                    "",
                ])?;
            }
            None => {
                wtr.write_record([
                    filename,
                    "error",
                    "",
                    "",
                    "",
                    "",
                    "",
                    "",
                    "",
                    &time,
                    outcome.error.as_deref().unwrap_or(""),
                ])?;
            }
        }
    }

    wtr.flush()?;
    Ok(())
}
