//! Schemas command - inspect the extraction schemas in use.

use clap::{Args, Subcommand};
use console::style;

use docex_core::SchemaRegistry;
use docex_core::models::document::DocumentType;

/// Arguments for the schemas command.
#[derive(Args)]
pub struct SchemasArgs {
    #[command(subcommand)]
    command: SchemasCommand,
}

#[derive(Subcommand)]
enum SchemasCommand {
    /// List document types and their field counts
    List,

    /// Print a schema as JSON
    Show {
        /// Document type (invoice, bill, prescription, unknown)
        #[arg(value_parser = super::parse_document_type)]
        document_type: DocumentType,
    },
}

pub fn run(args: SchemasArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let registry = SchemaRegistry::from_config(&config.schemas)?;

    match args.command {
        SchemasCommand::List => {
            if let Some(dir) = &config.schemas.dir {
                println!("{} Overrides from {}", style("ℹ").blue(), dir.display());
            }
            for document_type in registry.document_types() {
                let schema = registry.load_schema(document_type)?;
                println!(
                    "{:<14} {:>2} fields ({} required), {} checks",
                    style(document_type).bold(),
                    schema.fields.len(),
                    schema.required_fields().count(),
                    schema.checks.len()
                );
            }
        }
        SchemasCommand::Show { document_type } => {
            let schema = registry.load_schema(document_type)?;
            println!("{}", serde_json::to_string_pretty(schema.as_ref())?);
        }
    }

    Ok(())
}
