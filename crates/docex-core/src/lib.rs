//! Core library for schema-guided document extraction.
//!
//! This crate provides:
//! - Text ingestion from PDFs, scans and images (embedded text or OCR)
//! - Document classification (keyword heuristics with a model fallback)
//! - Self-consistency extraction against a generative model
//! - Per-field confidence scoring and schema validation with corrections
//! - A pipeline with a bounded validation retry loop

pub mod classify;
pub mod confidence;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod validate;

pub use classify::Classifier;
pub use confidence::{ConfidenceEngine, ConfidenceSummary};
pub use error::{
    ConfigError, DocexError, ExtractionError, IngestionError, ModelError, Result, Stage,
};
pub use extract::Extractor;
pub use ingest::{DocumentFormat, FileTextSource, TextRecognizer, TextSource};
pub use llm::{GeminiClient, GenerationRequest, GenerativeModel, ScriptedModel, ScriptedReply};
pub use models::config::DocexConfig;
pub use models::document::{DocumentType, RawDocument, RegionConfidence};
pub use models::record::{Agreement, ExtractionAttempt, FieldValue, ReconciledRecord};
pub use models::report::{
    Classification, ClassificationMethod, DocumentConfidence, ExtractionResult, FieldConfidence,
    IssueKind, PipelineWarning, Severity, Signal, ValidationIssue,
};
pub use pipeline::{Pipeline, Review};
pub use schema::{ExtractionSchema, FieldSpec, FieldType, SchemaRegistry};
pub use validate::Validator;
