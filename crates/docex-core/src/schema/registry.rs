//! Document type → schema lookup.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::{ExtractionSchema, embedded};
use crate::error::ConfigError;
use crate::models::config::SchemaConfig;
use crate::models::document::DocumentType;

/// Loaded schemas, one per document type.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<DocumentType, Arc<ExtractionSchema>>,
}

impl SchemaRegistry {
    /// An empty registry; add schemas with [`SchemaRegistry::insert`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in schemas for every document type.
    pub fn embedded() -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for document_type in DocumentType::ALL {
            let name = format!("<embedded>/{}.json", document_type);
            let schema = parse(embedded::source(document_type), &name)?;
            registry.insert_checked(document_type, schema, &name)?;
        }
        Ok(registry)
    }

    /// Built-in schemas, overridden by `<dir>/<document_type>.json` where present.
    pub fn from_dir(dir: &Path) -> Result<Self, ConfigError> {
        let mut registry = Self::embedded()?;
        for document_type in DocumentType::ALL {
            let path = dir.join(format!("{}.json", document_type));
            if !path.is_file() {
                continue;
            }
            let name = path.display().to_string();
            let content = std::fs::read_to_string(&path)?;
            let schema = parse(&content, &name)?;
            registry.insert_checked(document_type, schema, &name)?;
            info!("Loaded {} schema override from {}", document_type, name);
        }
        Ok(registry)
    }

    pub fn from_config(config: &SchemaConfig) -> Result<Self, ConfigError> {
        match &config.dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::embedded(),
        }
    }

    /// Register a schema under its own document type, replacing any previous one.
    pub fn insert(&mut self, schema: ExtractionSchema) -> Result<(), ConfigError> {
        let document_type = schema.document_type;
        self.insert_checked(document_type, schema, "<inline>")
    }

    fn insert_checked(
        &mut self,
        expected: DocumentType,
        schema: ExtractionSchema,
        source_name: &str,
    ) -> Result<(), ConfigError> {
        if schema.document_type != expected {
            return Err(ConfigError::MalformedSchema {
                source_name: source_name.to_string(),
                reason: format!(
                    "declares document_type '{}' but is registered for '{}'",
                    schema.document_type, expected
                ),
            });
        }
        schema.check(source_name)?;
        debug!(
            "Registered {} schema with {} fields",
            expected,
            schema.fields.len()
        );
        self.schemas.insert(expected, Arc::new(schema));
        Ok(())
    }

    pub fn load_schema(
        &self,
        document_type: DocumentType,
    ) -> Result<Arc<ExtractionSchema>, ConfigError> {
        self.schemas
            .get(&document_type)
            .cloned()
            .ok_or(ConfigError::SchemaNotFound(document_type))
    }

    pub fn document_types(&self) -> impl Iterator<Item = DocumentType> + '_ {
        self.schemas.keys().copied()
    }
}

/// Parse schema JSON, mapping failures to [`ConfigError::MalformedSchema`].
pub fn parse(json: &str, source_name: &str) -> Result<ExtractionSchema, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::MalformedSchema {
        source_name: source_name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    #[test]
    fn test_embedded_schemas_load() {
        let registry = SchemaRegistry::embedded().unwrap();
        assert_eq!(registry.document_types().count(), 4);

        let invoice = registry.load_schema(DocumentType::Invoice).unwrap();
        assert!(invoice.field("invoice_number").unwrap().required);
        assert_eq!(invoice.field("total").unwrap().field_type, FieldType::Number);
        assert_eq!(invoice.checks.len(), 2);

        let bill = registry.load_schema(DocumentType::Bill).unwrap();
        assert_eq!(bill.checks[0].subtract, vec!["payments".to_string()]);
    }

    #[test]
    fn test_missing_schema() {
        let registry = SchemaRegistry::new();
        let err = registry.load_schema(DocumentType::Bill).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaNotFound(DocumentType::Bill)));
    }

    #[test]
    fn test_directory_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bill.json"),
            r#"{"document_type": "bill", "fields": [{"name": "amount", "type": "number", "required": true}]}"#,
        )
        .unwrap();

        let registry = SchemaRegistry::from_dir(dir.path()).unwrap();
        let bill = registry.load_schema(DocumentType::Bill).unwrap();
        assert_eq!(bill.fields.len(), 1);
        // untouched types keep the built-in schema
        let invoice = registry.load_schema(DocumentType::Invoice).unwrap();
        assert!(invoice.field("total").is_some());
    }

    #[test]
    fn test_malformed_override_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("invoice.json"), "{ not json").unwrap();
        let err = SchemaRegistry::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedSchema { .. }));

        std::fs::write(
            dir.path().join("invoice.json"),
            r#"{"document_type": "bill", "fields": []}"#,
        )
        .unwrap();
        let err = SchemaRegistry::from_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("registered for 'invoice'"));
    }
}
