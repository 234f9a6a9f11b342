//! Confidence, validation, and final result types.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::document::DocumentType;
use super::record::{Agreement, FieldValue, ReconciledRecord};

/// One weighted input to a field's confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal name (`agreement`, `model_confidence`, `text_presence`, `format`, `missing`, `manual_edit`).
    pub name: String,
    /// Weight applied to the signal.
    pub weight: f64,
    /// Signal value before weighting (0.0 - 1.0).
    pub value: f64,
}

impl Signal {
    pub fn new(name: &str, weight: f64, value: f64) -> Self {
        Self {
            name: name.to_string(),
            weight,
            value,
        }
    }
}

/// Confidence for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfidence {
    pub field: String,
    /// Weighted score clipped to 0.0 - 1.0.
    pub score: f64,
    /// Signals in the order they were combined.
    pub contributing_signals: Vec<Signal>,
}

/// Document-level confidence report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentConfidence {
    /// Required-weighted mean of `field_scores`.
    #[serde(rename = "overall_confidence")]
    pub overall_score: f64,
    #[serde(rename = "field_confidence")]
    pub field_scores: BTreeMap<String, FieldConfidence>,
    pub low_confidence_fields: BTreeSet<String>,
}

impl DocumentConfidence {
    pub fn score(&self, field: &str) -> Option<f64> {
        self.field_scores.get(field).map(|f| f.score)
    }
}

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// Which check produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Required field absent.
    MissingRequired,
    /// Value does not parse as the declared type.
    TypeMismatch,
    /// Arithmetic check failed.
    Arithmetic,
    /// Field rule or cross-field check failed.
    RuleViolation,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub severity: Severity,
    pub kind: IssueKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_correction: Option<FieldValue>,
}

impl ValidationIssue {
    pub fn error(field: &str, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            severity: Severity::Error,
            kind,
            message: message.into(),
            suggested_correction: None,
        }
    }

    pub fn warning(field: &str, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            severity: Severity::Warning,
            kind,
            message: message.into(),
            suggested_correction: None,
        }
    }

    pub fn with_correction(mut self, correction: Option<FieldValue>) -> Self {
        self.suggested_correction = correction;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.field, self.message)?;
        if let Some(correction) = &self.suggested_correction {
            write!(f, " (suggested: {})", correction)?;
        }
        Ok(())
    }
}

/// How the document type was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    /// Supplied by the caller.
    Hint,
    /// Keyword and pattern rules were decisive.
    Heuristic,
    /// Heuristics were ambiguous and the model decided.
    Model,
    /// Heuristics were ambiguous and the model call failed.
    Fallback,
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub document_type: DocumentType,
    pub confidence: f64,
    pub method: ClassificationMethod,
    /// Per-candidate heuristic scores.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scores: BTreeMap<DocumentType, f64>,
}

impl Classification {
    /// The classification is a degraded guess.
    pub fn is_uncertain(&self) -> bool {
        self.method == ClassificationMethod::Fallback
    }
}

/// Non-fatal conditions surfaced with the result.
///
/// Serialized as a flat object tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WarningWire", into = "WarningWire")]
pub enum PipelineWarning {
    /// The classifier could not decide confidently.
    ClassificationUncertain { confidence: f64 },
    /// Error-severity issues remain after the retry budget was spent.
    ValidationFailed { errors: usize },
    /// A retry extraction failed; the previous record was kept.
    RetryFailed { reason: String },
}

// Internally tagged enums buffer their content, which loses exact JSON
// numbers, so warnings go through a plain struct instead.
#[derive(Serialize, Deserialize)]
struct WarningWire {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    errors: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl From<PipelineWarning> for WarningWire {
    fn from(warning: PipelineWarning) -> Self {
        let mut wire = WarningWire {
            kind: String::new(),
            confidence: None,
            errors: None,
            reason: None,
        };
        match warning {
            PipelineWarning::ClassificationUncertain { confidence } => {
                wire.kind = "classification_uncertain".into();
                wire.confidence = Some(confidence);
            }
            PipelineWarning::ValidationFailed { errors } => {
                wire.kind = "validation_failed".into();
                wire.errors = Some(errors);
            }
            PipelineWarning::RetryFailed { reason } => {
                wire.kind = "retry_failed".into();
                wire.reason = Some(reason);
            }
        }
        wire
    }
}

impl TryFrom<WarningWire> for PipelineWarning {
    type Error = String;

    fn try_from(wire: WarningWire) -> Result<Self, Self::Error> {
        let missing = |field: &str| format!("warning '{}' is missing '{}'", wire.kind, field);
        match wire.kind.as_str() {
            "classification_uncertain" => Ok(PipelineWarning::ClassificationUncertain {
                confidence: wire.confidence.ok_or_else(|| missing("confidence"))?,
            }),
            "validation_failed" => Ok(PipelineWarning::ValidationFailed {
                errors: wire.errors.ok_or_else(|| missing("errors"))?,
            }),
            "retry_failed" => Ok(PipelineWarning::RetryFailed {
                reason: wire.reason.clone().ok_or_else(|| missing("reason"))?,
            }),
            other => Err(format!("unknown warning kind '{}'", other)),
        }
    }
}

/// Final output of the pipeline for one document.
///
/// In JSON the record and confidence members sit at the top level next to
/// `document_type`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub document_type: DocumentType,
    pub record: ReconciledRecord,
    pub confidence: DocumentConfidence,
    pub issues: Vec<ValidationIssue>,
    pub retry_count: u32,
    pub classification: Classification,
    pub warnings: Vec<PipelineWarning>,
}

// Spelled out instead of `#[serde(flatten)]`, which would route field values
// through serde's buffered content and lose exact decimal amounts.
#[derive(Serialize)]
struct ResultOut<'a> {
    document_type: DocumentType,
    fields: &'a BTreeMap<String, FieldValue>,
    agreement: &'a BTreeMap<String, Agreement>,
    #[serde(skip_serializing_if = "is_empty_map")]
    model_confidence: &'a BTreeMap<String, f64>,
    overall_confidence: f64,
    field_confidence: &'a BTreeMap<String, FieldConfidence>,
    low_confidence_fields: &'a BTreeSet<String>,
    issues: &'a [ValidationIssue],
    retry_count: u32,
    classification: &'a Classification,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    warnings: &'a [PipelineWarning],
}

fn is_empty_map(map: &&BTreeMap<String, f64>) -> bool {
    map.is_empty()
}

#[derive(Deserialize)]
struct ResultIn {
    document_type: DocumentType,
    fields: BTreeMap<String, FieldValue>,
    agreement: BTreeMap<String, Agreement>,
    #[serde(default)]
    model_confidence: BTreeMap<String, f64>,
    overall_confidence: f64,
    field_confidence: BTreeMap<String, FieldConfidence>,
    low_confidence_fields: BTreeSet<String>,
    issues: Vec<ValidationIssue>,
    retry_count: u32,
    classification: Classification,
    #[serde(default)]
    warnings: Vec<PipelineWarning>,
}

impl Serialize for ExtractionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ResultOut {
            document_type: self.document_type,
            fields: &self.record.fields,
            agreement: &self.record.agreement,
            model_confidence: &self.record.model_confidence,
            overall_confidence: self.confidence.overall_score,
            field_confidence: &self.confidence.field_scores,
            low_confidence_fields: &self.confidence.low_confidence_fields,
            issues: &self.issues,
            retry_count: self.retry_count,
            classification: &self.classification,
            warnings: &self.warnings,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ExtractionResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = ResultIn::deserialize(deserializer)?;
        Ok(ExtractionResult {
            document_type: wire.document_type,
            record: ReconciledRecord {
                fields: wire.fields,
                agreement: wire.agreement,
                model_confidence: wire.model_confidence,
            },
            confidence: DocumentConfidence {
                overall_score: wire.overall_confidence,
                field_scores: wire.field_confidence,
                low_confidence_fields: wire.low_confidence_fields,
            },
            issues: wire.issues,
            retry_count: wire.retry_count,
            classification: wire.classification,
            warnings: wire.warnings,
        })
    }
}

impl ExtractionResult {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn warnings_only(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| !i.is_error())
    }

    /// No error-severity issues remain.
    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
