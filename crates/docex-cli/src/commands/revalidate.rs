//! Revalidate command - apply manual edits to a saved result.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use console::style;

use docex_core::{ExtractionResult, Review, SchemaRegistry};

use super::output::{OutputFormat, format_result, print_diagnostics};

/// Arguments for the revalidate command.
#[derive(Args)]
pub struct RevalidateArgs {
    /// Result JSON written by `docex process`
    #[arg(required = true)]
    input: PathBuf,

    /// Set a field, e.g. `--set total=88.00` (repeatable)
    #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = parse_edit)]
    set: Vec<(String, String)>,

    /// Clear a field (repeatable)
    #[arg(long = "clear", value_name = "FIELD")]
    clear: Vec<String>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,
}

fn parse_edit(s: &str) -> Result<(String, String), String> {
    let (field, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{}'", s))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing field name in '{}'", s));
    }
    Ok((field.to_string(), value.to_string()))
}

pub fn run(args: RevalidateArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let registry = SchemaRegistry::from_config(&config.schemas)?;
    let review = Review::new(&config, registry)?;

    let content = fs::read_to_string(&args.input)
        .with_context(|| format!("cannot read {}", args.input.display()))?;
    let result = ExtractionResult::from_json(&content)
        .with_context(|| format!("{} is not a docex result", args.input.display()))?;

    let mut edits: BTreeMap<String, Option<String>> = BTreeMap::new();
    for field in args.clear {
        edits.insert(field, None);
    }
    for (field, value) in args.set {
        edits.insert(field, Some(value));
    }
    if edits.is_empty() {
        eprintln!("{} No edits given; re-running validation only", style("ℹ").blue());
    }

    let revised = review.revalidate(result, &edits)?;
    let output = format_result(&revised, args.format)?;

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

    print_diagnostics(&revised);
    Ok(())
}
