//! Rendering results as JSON, CSV or a text report.

use std::fmt::Write as _;

use console::style;

use docex_core::{ExtractionResult, PipelineWarning};

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output, one row per field
    Csv,
    /// Plain text report
    Text,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Text => "txt",
        }
    }
}

pub fn format_result(result: &ExtractionResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(result.to_json_pretty()?),
        OutputFormat::Csv => format_csv(result),
        OutputFormat::Text => Ok(format_text(result)),
    }
}

fn format_csv(result: &ExtractionResult) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record(["field", "value", "confidence", "low_confidence", "agreement"])?;

    for (field, fc) in &result.confidence.field_scores {
        let value = result
            .record
            .get(field)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let agreement = result
            .record
            .agreement
            .get(field)
            .map(|a| format!("{}/{}", a.votes, a.total))
            .unwrap_or_default();
        wtr.write_record([
            field.as_str(),
            &value,
            &format!("{:.3}", fc.score),
            if result.confidence.low_confidence_fields.contains(field) {
                "true"
            } else {
                "false"
            },
            &agreement,
        ])?;
    }

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

pub fn format_text(result: &ExtractionResult) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "Document type: {} ({:?}, confidence {:.2})",
        result.document_type, result.classification.method, result.classification.confidence
    );
    let _ = writeln!(
        output,
        "Overall confidence: {:.1}%",
        result.confidence.overall_score * 100.0
    );
    if result.retry_count > 0 {
        let _ = writeln!(output, "Retries: {}", result.retry_count);
    }
    output.push('\n');

    output.push_str("Fields:\n");
    for (field, fc) in &result.confidence.field_scores {
        let value = result
            .record
            .get(field)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        let marker = if result.confidence.low_confidence_fields.contains(field) {
            " (low)"
        } else {
            ""
        };
        let _ = writeln!(output, "  {:<20} {:<30} {:.2}{}", field, value, fc.score, marker);
    }

    if !result.issues.is_empty() {
        output.push_str("\nIssues:\n");
        for issue in &result.issues {
            let _ = writeln!(output, "  {}", issue);
        }
    }

    if !result.warnings.is_empty() {
        output.push_str("\nWarnings:\n");
        for warning in &result.warnings {
            let _ = writeln!(output, "  {}", describe_warning(warning));
        }
    }

    output
}

pub fn describe_warning(warning: &PipelineWarning) -> String {
    match warning {
        PipelineWarning::ClassificationUncertain { confidence } => {
            format!("document type is uncertain (confidence {:.2})", confidence)
        }
        PipelineWarning::ValidationFailed { errors } => {
            format!("{} validation errors remain", errors)
        }
        PipelineWarning::RetryFailed { reason } => format!("retry failed: {}", reason),
    }
}

/// Issue and warning digest for stderr.
pub fn print_diagnostics(result: &ExtractionResult) {
    for warning in &result.warnings {
        eprintln!("{} {}", style("⚠").yellow(), describe_warning(warning));
    }
    let errors = result.errors().count();
    let warnings = result.warnings_only().count();
    if errors > 0 || warnings > 0 {
        eprintln!(
            "{} {} errors, {} warnings",
            style("ℹ").blue(),
            style(errors).red(),
            style(warnings).yellow()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docex_core::{
        Agreement, Classification, ClassificationMethod, DocumentConfidence, DocumentType,
        FieldConfidence, FieldValue, ReconciledRecord,
    };
    use std::collections::BTreeMap;

    fn result() -> ExtractionResult {
        let mut record = ReconciledRecord::default();
        record.fields.insert("invoice_number".into(), FieldValue::text("INV-7"));
        record.agreement.insert("invoice_number".into(), Agreement { votes: 2, total: 3 });
        let mut field_scores = BTreeMap::new();
        field_scores.insert(
            "invoice_number".to_string(),
            FieldConfidence {
                field: "invoice_number".into(),
                score: 0.65,
                contributing_signals: Vec::new(),
            },
        );
        ExtractionResult {
            document_type: DocumentType::Invoice,
            record,
            confidence: DocumentConfidence {
                overall_score: 0.65,
                field_scores,
                low_confidence_fields: ["invoice_number".to_string()].into_iter().collect(),
            },
            issues: Vec::new(),
            retry_count: 0,
            classification: Classification {
                document_type: DocumentType::Invoice,
                confidence: 0.9,
                method: ClassificationMethod::Heuristic,
                scores: BTreeMap::new(),
            },
            warnings: vec![PipelineWarning::ValidationFailed { errors: 2 }],
        }
    }

    #[test]
    fn test_csv_rows() {
        let csv = format_result(&result(), OutputFormat::Csv).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("field,value,confidence,low_confidence,agreement")
        );
        assert_eq!(lines.next(), Some("invoice_number,INV-7,0.650,true,2/3"));
    }

    #[test]
    fn test_text_report() {
        let text = format_text(&result());
        assert!(text.contains("Document type: invoice"));
        assert!(text.contains("INV-7"));
        assert!(text.contains("(low)"));
        assert!(text.contains("2 validation errors remain"));
    }
}
