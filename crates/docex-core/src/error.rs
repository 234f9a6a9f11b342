//! Error types for the docex-core library.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::models::document::DocumentType;

/// Main error type for the docex library.
///
/// Only document-level fatal conditions live here. Recoverable conditions
/// (a single failed attempt, a single mistyped field, an uncertain
/// classification, unresolved validation issues) are carried as values on
/// the [`ExtractionResult`](crate::models::report::ExtractionResult).
#[derive(Error, Debug)]
pub enum DocexError {
    /// The input document could not be turned into text.
    #[error("ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    /// Missing or malformed configuration or schema.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Every extraction attempt failed.
    #[error(
        "extraction failed for {document_type} document during {stage}: all {attempts} attempts failed"
    )]
    ExtractionFailed {
        document_type: DocumentType,
        stage: Stage,
        attempts: usize,
        reasons: Vec<String>,
    },

    /// A manual edit names a field the document's schema does not define.
    #[error("field '{field}' is not defined for {document_type} documents")]
    UnknownField {
        document_type: DocumentType,
        field: String,
    },
}

/// Extraction pass an [`ExtractionError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The first extraction over the whole schema. Failing here is fatal.
    Extraction,
    /// A validation retry over the failing fields. Failing here is reported
    /// as a warning and the earlier record is kept.
    Retry,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extraction => "extraction",
            Stage::Retry => "retry",
        };
        f.write_str(name)
    }
}

/// Errors raised while turning a file or byte stream into a [`RawDocument`](crate::models::document::RawDocument).
#[derive(Error, Debug)]
pub enum IngestionError {
    /// The file extension or content is not a supported PDF or raster image.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ingestion succeeded but produced no usable text.
    #[error("no text could be extracted from the document")]
    EmptyText,

    /// The document needs OCR but no recognizer is configured.
    #[error("document requires OCR but no OCR engine is available")]
    OcrUnavailable,

    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// OCR processing error.
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Image decoding error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// Failed to extract text from PDF.
    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,
}

/// Errors related to OCR processing.
#[derive(Error, Debug)]
pub enum OcrError {
    /// Failed to load OCR models.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Text recognition failed.
    #[error("text recognition failed: {0}")]
    Recognition(String),
}

/// Configuration and schema errors. Always surfaced before any document is processed.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No schema is registered for the document type.
    #[error("no schema registered for document type '{0}'")]
    SchemaNotFound(DocumentType),

    /// A schema file exists but cannot be used.
    #[error("malformed schema {source_name}: {reason}")]
    MalformedSchema { source_name: String, reason: String },

    /// A configuration option is out of range.
    #[error("invalid option {key}: {reason}")]
    InvalidOption { key: String, reason: String },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// Configuration or schema file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidOption {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the self-consistency extractor.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// Every attempt failed (transport error, timeout, or malformed response).
    #[error("all {attempts} extraction attempts failed")]
    AllAttemptsFailed {
        attempts: usize,
        reasons: Vec<String>,
    },

    /// The requested run count was zero.
    #[error("run count must be at least 1")]
    NoRuns,
}

/// Errors from a single generative-model call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// The call did not finish before its deadline.
    #[error("model call timed out")]
    Timeout,

    /// Could not reach the model endpoint.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint returned a non-success status.
    #[error("model endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response was not usable JSON.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// No API key was found for the configured provider.
    #[error("API key not set (expected environment variable {0})")]
    MissingApiKey(String),
}

/// Result type for the docex library.
pub type Result<T> = std::result::Result<T, DocexError>;
