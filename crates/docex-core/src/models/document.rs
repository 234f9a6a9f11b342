//! Document types and the raw text handed over by the text source.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Commercial invoice.
    Invoice,
    /// Utility or service bill / statement.
    Bill,
    /// Medical prescription.
    Prescription,
    /// Could not be classified; extracted with the generic schema.
    Unknown,
}

impl DocumentType {
    /// Types the classifier can choose between.
    pub const CANDIDATES: [DocumentType; 3] = [
        DocumentType::Invoice,
        DocumentType::Bill,
        DocumentType::Prescription,
    ];

    /// Every type, including `Unknown`.
    pub const ALL: [DocumentType; 4] = [
        DocumentType::Invoice,
        DocumentType::Bill,
        DocumentType::Prescription,
        DocumentType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::Bill => "bill",
            DocumentType::Prescription => "prescription",
            DocumentType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s
            .trim()
            .trim_matches(|c: char| c == '"' || c == '.' || c == '\'')
            .to_lowercase();
        match cleaned.as_str() {
            "invoice" => Ok(DocumentType::Invoice),
            "bill" | "statement" => Ok(DocumentType::Bill),
            "prescription" | "rx" => Ok(DocumentType::Prescription),
            "unknown" | "other" => Ok(DocumentType::Unknown),
            _ => Err(format!("unknown document type: {}", s)),
        }
    }
}

/// Confidence reported by the text source for one region (page or OCR box).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfidence {
    /// Page number (1-indexed).
    pub page: u32,
    /// Recognition confidence (0.0 - 1.0).
    pub score: f32,
}

/// Text produced by the text source. Read-only for every later stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Full document text.
    pub text: String,
    /// Per-region recognition confidence.
    pub source_confidence: Vec<RegionConfidence>,
    /// Number of pages ingested.
    pub page_count: u32,
    /// Caller-supplied type; skips classification when set.
    pub document_type_hint: Option<DocumentType>,
}

impl RawDocument {
    /// Build a document from plain text (one page, full confidence).
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_confidence: vec![RegionConfidence { page: 1, score: 1.0 }],
            page_count: 1,
            document_type_hint: None,
        }
    }

    pub fn with_hint(mut self, hint: DocumentType) -> Self {
        self.document_type_hint = Some(hint);
        self
    }

    /// Mean recognition confidence over all regions, 0.0 if none were reported.
    pub fn mean_confidence(&self) -> f32 {
        if self.source_confidence.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.source_confidence.iter().map(|r| r.score).sum();
        sum / self.source_confidence.len() as f32
    }

    /// Whitespace-separated word count.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}
