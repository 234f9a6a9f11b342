//! CLI subcommands.

pub mod batch;
pub mod config;
pub mod output;
pub mod process;
pub mod revalidate;
pub mod schemas;

use std::path::Path;

use tracing::debug;

use docex_core::DocexConfig;
use docex_core::models::document::DocumentType;

/// Load the config from `--config`, else the user config file, else defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<DocexConfig> {
    if let Some(path) = config_path {
        return Ok(DocexConfig::from_file(Path::new(path))?);
    }
    let default_path = config::default_config_path();
    if default_path.exists() {
        debug!("Using config file {}", default_path.display());
        Ok(DocexConfig::from_file(&default_path)?)
    } else {
        Ok(DocexConfig::default())
    }
}

/// clap value parser for `--type`.
pub fn parse_document_type(s: &str) -> Result<DocumentType, String> {
    s.parse()
}
