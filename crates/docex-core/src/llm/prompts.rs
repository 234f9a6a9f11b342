//! Prompt templates.

use std::fmt::Write;

use serde_json::{Value, json};

use crate::models::document::DocumentType;
use crate::models::report::ValidationIssue;
use crate::schema::{ExtractionSchema, FieldSpec, FieldType};

/// Characters of document text shown to the classifier.
const CLASSIFICATION_EXCERPT: usize = 2000;

fn describe_fields(schema: &ExtractionSchema) -> String {
    let mut out = String::new();
    for field in &schema.fields {
        describe_field(&mut out, field, "");
    }
    out
}

fn describe_field(out: &mut String, field: &FieldSpec, indent: &str) {
    let type_desc = match &field.field_type {
        FieldType::String => "string".to_string(),
        FieldType::Number => "number".to_string(),
        FieldType::Date => "date, YYYY-MM-DD".to_string(),
        FieldType::Enum { values } => format!("one of {}", values.join(", ")),
        FieldType::List { .. } => "array of objects with these fields".to_string(),
    };
    let required = if field.required { ", required" } else { "" };
    let _ = write!(out, "{}- {} ({}{})", indent, field.name, type_desc, required);
    if !field.description.is_empty() {
        let _ = write!(out, ": {}", field.description);
    }
    out.push('\n');
    if let Some((items, _)) = field.field_type.as_list() {
        for item in items {
            describe_field(out, item, "  ");
        }
    }
}

const RULES: &str = "\
1. Return ONLY a JSON object - no explanations or markdown
2. Use null for values not present in the document; never guess
3. Write dates as YYYY-MM-DD
4. Write numbers as plain JSON numbers without currency symbols or thousands separators
5. Copy names and identifiers exactly as printed
6. Give one array entry per line item, in document order; use [] when there are none
7. Add a \"_confidence\" object mapping each field you filled to your confidence between 0.0 and 1.0";

/// Prompt for one self-consistency attempt. Identical for every attempt.
pub fn extraction_prompt(schema: &ExtractionSchema, text: &str) -> String {
    format!(
        "Extract structured information from this {doc_type} document.\n\n\
         FIELDS:\n{fields}\n\
         RULES:\n{RULES}\n\n\
         DOCUMENT TEXT:\n{text}\n\n\
         JSON OUTPUT:",
        doc_type = schema.document_type,
        fields = describe_fields(schema),
    )
}

/// Prompt for re-extracting fields that failed validation. `schema` is the
/// subset holding only those fields.
pub fn retry_prompt(schema: &ExtractionSchema, text: &str, issues: &[ValidationIssue]) -> String {
    let mut problems = String::new();
    for issue in issues {
        let _ = writeln!(problems, "- {}: {}", issue.field, issue.message);
    }
    format!(
        "A previous extraction from this {doc_type} document failed validation:\n{problems}\n\
         Re-read the document carefully and extract ONLY these fields.\n\n\
         FIELDS:\n{fields}\n\
         RULES:\n{RULES}\n\n\
         DOCUMENT TEXT:\n{text}\n\n\
         JSON OUTPUT:",
        doc_type = schema.document_type,
        fields = describe_fields(schema),
    )
}

/// Classification-only prompt answered with `{"document_type": label}`.
pub fn classification_prompt(text: &str) -> String {
    let excerpt: String = text.chars().take(CLASSIFICATION_EXCERPT).collect();
    let labels: Vec<&str> = DocumentType::CANDIDATES.iter().map(|t| t.as_str()).collect();
    format!(
        "Classify the following document as one of: {labels}.\n\n\
         Indicators:\n\
         - invoice: invoice number, vendor details, itemized charges, tax calculations\n\
         - bill: account number, billing period, service charges, payment due date\n\
         - prescription: medication names, dosages, prescriber, pharmacy details\n\n\
         DOCUMENT TEXT:\n{excerpt}\n\n\
         Answer with a JSON object {{\"document_type\": \"<label>\"}}.",
        labels = labels.join(", "),
    )
}

/// Response schema for [`classification_prompt`].
pub fn classification_schema() -> Value {
    let labels: Vec<&str> = DocumentType::CANDIDATES.iter().map(|t| t.as_str()).collect();
    json!({
        "type": "OBJECT",
        "properties": {
            "document_type": { "type": "STRING", "enum": labels }
        },
        "required": ["document_type"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::report::IssueKind;
    use crate::schema::SchemaRegistry;

    #[test]
    fn test_extraction_prompt_lists_fields() {
        let schema = SchemaRegistry::embedded()
            .unwrap()
            .load_schema(DocumentType::Invoice)
            .unwrap();
        let prompt = extraction_prompt(&schema, "INVOICE #1");
        assert!(prompt.contains("- invoice_number (string, required)"));
        assert!(prompt.contains("- invoice_date (date, YYYY-MM-DD, required)"));
        assert!(prompt.contains("_confidence"));
        assert!(prompt.contains("- items (array of objects with these fields)"));
        assert!(prompt.contains("\n  - unit_price (number, required)"));
        assert!(prompt.ends_with("JSON OUTPUT:"));
    }

    #[test]
    fn test_retry_prompt_lists_failures() {
        let schema = SchemaRegistry::embedded()
            .unwrap()
            .load_schema(DocumentType::Invoice)
            .unwrap()
            .subset(&["invoice_number"]);
        let issues = vec![ValidationIssue::error(
            "invoice_number",
            IssueKind::MissingRequired,
            "required field is missing",
        )];
        let prompt = retry_prompt(&schema, "text", &issues);
        assert!(prompt.contains("- invoice_number: required field is missing"));
        assert!(!prompt.contains("vendor_name"));
    }

    #[test]
    fn test_classification_prompt_truncates() {
        let text = "x".repeat(5000);
        let prompt = classification_prompt(&text);
        assert!(prompt.len() < 3000);
        assert!(prompt.contains("invoice, bill, prescription"));
    }
}
