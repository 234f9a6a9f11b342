//! End-to-end document processing with a bounded validation retry loop.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classify::Classifier;
use crate::confidence::{self, ConfidenceEngine};
use crate::error::{ConfigError, DocexError, ExtractionError, IngestionError, Stage};
use crate::extract::Extractor;
use crate::ingest::TextSource;
use crate::llm::{GenerativeModel, prompts};
use crate::models::config::DocexConfig;
use crate::models::document::{DocumentType, RawDocument};
use crate::models::record::{FieldPath, FieldValue, ReconciledRecord};
use crate::models::report::{
    Classification, ClassificationMethod, DocumentConfidence, ExtractionResult, PipelineWarning,
    ValidationIssue,
};
use crate::schema::kinds::ListKind;
use crate::schema::{ExtractionSchema, FieldKind, FieldSpec, SchemaRegistry};
use crate::validate::Validator;

/// Retry loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing extracted yet.
    Initial,
    /// Record scored and validated.
    Validated,
    /// Re-extracting the fields with error issues.
    Retrying,
    Final,
}

/// Scoring and validation of records, shared by [`Pipeline`] and offline revalidation.
#[derive(Debug, Clone)]
pub struct Review {
    registry: SchemaRegistry,
    confidence: ConfidenceEngine,
    validator: Validator,
}

impl Review {
    /// Build from a validated configuration. Every document type must have a schema.
    pub fn new(config: &DocexConfig, registry: SchemaRegistry) -> Result<Self, ConfigError> {
        config.validate()?;
        for document_type in DocumentType::ALL {
            registry.load_schema(document_type)?;
        }
        Ok(Self {
            registry,
            confidence: ConfidenceEngine::new(&config.confidence),
            validator: Validator::new(&config.validation),
        })
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn confidence(&self) -> &ConfidenceEngine {
        &self.confidence
    }

    pub fn schema(&self, document_type: DocumentType) -> Result<Arc<ExtractionSchema>, ConfigError> {
        self.registry.load_schema(document_type)
    }

    fn assess(
        &self,
        record: &ReconciledRecord,
        raw_text: &str,
        schema: &ExtractionSchema,
    ) -> (DocumentConfidence, Vec<ValidationIssue>) {
        let confidence = self.confidence.score(record, raw_text, schema);
        let issues = self
            .validator
            .validate(record, schema, schema.document_type);
        (confidence, issues)
    }

    /// Apply manual edits to a finished result and re-run validation.
    ///
    /// Keys are field names or list-cell paths such as `items[0].total`.
    /// `Some(value)` replaces the value (canonicalized for its type when
    /// possible; a whole list is entered as a JSON array of objects), `None`
    /// clears it. Edited fields score 1.0. A cell edit leaves the list's score
    /// alone. The other field scores are kept and the document score is
    /// re-aggregated.
    pub fn revalidate(
        &self,
        result: ExtractionResult,
        edits: &BTreeMap<String, Option<String>>,
    ) -> Result<ExtractionResult, DocexError> {
        let document_type = result.document_type;
        let schema = self.schema(document_type)?;
        let mut record = result.record;
        let mut field_scores = result.confidence.field_scores;

        for (path, raw) in edits {
            let unknown = || DocexError::UnknownField {
                document_type,
                field: path.clone(),
            };
            let parsed = FieldPath::parse(path);
            let spec = schema.field(parsed.field).ok_or_else(unknown)?;
            let raw = raw.as_deref().map(str::trim).filter(|s| !s.is_empty());

            let Some((index, name)) = parsed.cell else {
                match raw {
                    Some(raw) => {
                        let value = entered_value(spec, raw);
                        debug!("Manual edit: {} = {}", path, value);
                        record = record.with_edit(path, value);
                        field_scores.insert(path.clone(), confidence::manual_edit(path));
                    }
                    None => {
                        debug!("Manual edit: {} cleared", path);
                        record = record.without(path);
                        if spec.required {
                            field_scores.insert(path.clone(), confidence::missing(path));
                        } else {
                            field_scores.remove(path);
                        }
                    }
                }
                continue;
            };

            let item_spec = spec
                .field_type
                .as_list()
                .and_then(|(items, _)| items.iter().find(|item| item.name == name))
                .ok_or_else(unknown)?;
            let entries = record.get(parsed.field).and_then(FieldValue::as_list).map_or(0, <[_]>::len);
            if index >= entries {
                return Err(unknown());
            }
            record = match raw {
                Some(raw) => {
                    let value = entered_value(item_spec, raw);
                    debug!("Manual edit: {} = {}", path, value);
                    record.with_edit(path, value)
                }
                None => {
                    debug!("Manual edit: {} cleared", path);
                    record.without(path)
                }
            };
        }

        let confidence = self.confidence.aggregate(field_scores, &schema);
        let issues = self.validator.validate(&record, &schema, document_type);

        let mut warnings: Vec<PipelineWarning> = result
            .warnings
            .into_iter()
            .filter(|w| !matches!(w, PipelineWarning::ValidationFailed { .. }))
            .collect();
        push_validation_warning(&mut warnings, &issues);

        info!(
            "Revalidated {} result after {} edits: {} issues",
            document_type,
            edits.len(),
            issues.len()
        );

        Ok(ExtractionResult {
            document_type,
            record,
            confidence,
            issues,
            retry_count: result.retry_count,
            classification: result.classification,
            warnings,
        })
    }
}

/// Value typed in by a reviewer, canonicalized for `spec` when it fits.
fn entered_value(spec: &FieldSpec, raw: &str) -> FieldValue {
    if let Some((items, _)) = spec.field_type.as_list() {
        let list = serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .as_ref()
            .and_then(FieldValue::from_json)
            .and_then(|value| ListKind { items }.canonicalize(&value));
        if let Some(list) = list {
            return list;
        }
    }
    let entered = FieldValue::text(raw);
    spec.kind().canonicalize(&entered).unwrap_or(entered)
}

/// Classify, extract, score and validate one document at a time.
pub struct Pipeline<M> {
    model: Arc<M>,
    classifier: Classifier,
    extractor: Extractor<M>,
    review: Review,
    runs: usize,
    retry_budget: u32,
    auto_correct: bool,
}

impl<M: GenerativeModel> Pipeline<M> {
    /// Build a pipeline. Fails if the configuration is invalid or a schema is missing.
    pub fn new(
        config: &DocexConfig,
        registry: SchemaRegistry,
        model: Arc<M>,
    ) -> Result<Self, ConfigError> {
        let review = Review::new(config, registry)?;
        Ok(Self {
            classifier: Classifier::new(&config.classification),
            extractor: Extractor::new(Arc::clone(&model), &config.extraction),
            model,
            review,
            runs: config.extraction.self_consistency_runs,
            retry_budget: config.extraction.retry_budget,
            auto_correct: false,
        })
    }

    /// Build with the schema registry described by `config.schemas`.
    pub fn from_config(config: &DocexConfig, model: Arc<M>) -> Result<Self, ConfigError> {
        let registry = SchemaRegistry::from_config(&config.schemas)?;
        Self::new(config, registry, model)
    }

    /// Override the number of self-consistency runs.
    pub fn with_runs(mut self, runs: usize) -> Result<Self, ConfigError> {
        if runs == 0 {
            return Err(ConfigError::invalid(
                "extraction.self_consistency_runs",
                "must be at least 1",
            ));
        }
        self.runs = runs;
        Ok(self)
    }

    /// Override the low-confidence threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::invalid(
                "confidence.low_confidence_threshold",
                "must be within 0.0 - 1.0",
            ));
        }
        self.review.confidence = self.review.confidence.with_threshold(threshold);
        Ok(self)
    }

    /// Apply suggested corrections to the final record and re-check it.
    pub fn with_auto_correct(mut self, enabled: bool) -> Self {
        self.auto_correct = enabled;
        self
    }

    pub fn review(&self) -> &Review {
        &self.review
    }

    /// Load a document through `source` and process it, optionally bounded by `deadline`.
    pub async fn process_path<S: TextSource>(
        &self,
        source: &S,
        path: &Path,
        hint: Option<DocumentType>,
        deadline: Option<Instant>,
    ) -> Result<ExtractionResult, DocexError> {
        let mut document = source.load(path)?;
        document.document_type_hint = hint;
        info!(
            "Loaded {} ({} pages, {} words)",
            path.display(),
            document.page_count,
            document.word_count()
        );
        self.run(&document, deadline).await
    }

    /// Process one document.
    ///
    /// Fatal only when the text is empty or every extraction attempt failed.
    /// Validation problems, a shaky classification and failed retries are
    /// reported in the result.
    pub async fn process(&self, document: &RawDocument) -> Result<ExtractionResult, DocexError> {
        self.run(document, None).await
    }

    /// Like [`Pipeline::process`], but no model call runs past `deadline`.
    ///
    /// A classification call cut short falls back to the heuristics, an
    /// initial extraction cut short is fatal, and a retry cut short keeps the
    /// earlier record with a [`PipelineWarning::RetryFailed`].
    pub async fn process_until(
        &self,
        document: &RawDocument,
        deadline: Instant,
    ) -> Result<ExtractionResult, DocexError> {
        self.run(document, Some(deadline)).await
    }

    async fn run(
        &self,
        document: &RawDocument,
        deadline: Option<Instant>,
    ) -> Result<ExtractionResult, DocexError> {
        let text = document.text.as_str();
        if text.trim().is_empty() {
            return Err(IngestionError::EmptyText.into());
        }

        let classification = match document.document_type_hint {
            Some(document_type) => {
                debug!("Using document type hint: {}", document_type);
                Classification {
                    document_type,
                    confidence: 1.0,
                    method: ClassificationMethod::Hint,
                    scores: BTreeMap::new(),
                }
            }
            None => {
                self.classifier
                    .classify_until(text, Some(self.model.as_ref()), deadline)
                    .await
            }
        };

        let mut warnings = Vec::new();
        if classification.is_uncertain() {
            warnings.push(PipelineWarning::ClassificationUncertain {
                confidence: classification.confidence,
            });
        }

        let document_type = classification.document_type;
        let schema = self.review.schema(document_type)?;

        let mut state = State::Initial;
        let mut record = ReconciledRecord::default();
        let mut confidence = DocumentConfidence::default();
        let mut issues = Vec::new();
        let mut retry_count = 0;

        while state != State::Final {
            state = match state {
                State::Initial => {
                    let prompt = prompts::extraction_prompt(&schema, text);
                    record = self
                        .extractor
                        .extract_with_prompt(&prompt, &schema, self.runs, deadline)
                        .await
                        .map_err(|e| extraction_failed(document_type, Stage::Extraction, e))?;
                    State::Validated
                }
                State::Validated => {
                    (confidence, issues) = self.review.assess(&record, text, &schema);
                    let errors = issues.iter().filter(|i| i.is_error()).count();
                    if errors > 0 && retry_count < self.retry_budget {
                        State::Retrying
                    } else {
                        State::Final
                    }
                }
                State::Retrying => {
                    retry_count += 1;
                    let failing: BTreeSet<&str> = issues
                        .iter()
                        .filter(|i| i.is_error())
                        .map(|i| FieldPath::parse(&i.field).field)
                        .collect();
                    let names: Vec<&str> = failing.into_iter().collect();
                    let subset = schema.subset(&names);
                    let errors: Vec<ValidationIssue> =
                        issues.iter().filter(|i| i.is_error()).cloned().collect();
                    info!(
                        "Retry {}/{}: re-extracting {:?}",
                        retry_count, self.retry_budget, names
                    );

                    let prompt = prompts::retry_prompt(&subset, text, &errors);
                    match self
                        .extractor
                        .extract_with_prompt(&prompt, &subset, self.runs, deadline)
                        .await
                    {
                        Ok(retry) => record = std::mem::take(&mut record).merged_with(retry),
                        Err(e) => {
                            let reason = extraction_failed(document_type, Stage::Retry, e).to_string();
                            warn!("Retry {} failed: {}", retry_count, reason);
                            warnings.push(PipelineWarning::RetryFailed { reason });
                        }
                    }
                    State::Validated
                }
                State::Final => State::Final,
            };
        }

        if self.auto_correct && issues.iter().any(|i| i.suggested_correction.is_some()) {
            record = record.apply_corrections(&issues);
            (confidence, issues) = self.review.assess(&record, text, &schema);
        }

        push_validation_warning(&mut warnings, &issues);

        info!(
            "Processed {} document: {} fields, confidence {:.2}, {} issues, {} retries",
            document_type,
            record.len(),
            confidence.overall_score,
            issues.len(),
            retry_count
        );

        Ok(ExtractionResult {
            document_type,
            record,
            confidence,
            issues,
            retry_count,
            classification,
            warnings,
        })
    }

    /// Apply manual edits to a finished result. See [`Review::revalidate`].
    pub fn revalidate(
        &self,
        result: ExtractionResult,
        edits: &BTreeMap<String, Option<String>>,
    ) -> Result<ExtractionResult, DocexError> {
        self.review.revalidate(result, edits)
    }
}

fn push_validation_warning(warnings: &mut Vec<PipelineWarning>, issues: &[ValidationIssue]) {
    let errors = issues.iter().filter(|i| i.is_error()).count();
    if errors > 0 {
        warnings.push(PipelineWarning::ValidationFailed { errors });
    }
}

fn extraction_failed(document_type: DocumentType, stage: Stage, err: ExtractionError) -> DocexError {
    match err {
        ExtractionError::AllAttemptsFailed { attempts, reasons } => DocexError::ExtractionFailed {
            document_type,
            stage,
            attempts,
            reasons,
        },
        ExtractionError::NoRuns => ConfigError::invalid(
            "extraction.self_consistency_runs",
            "must be at least 1",
        )
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::{ScriptedModel, ScriptedReply};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn review() -> Review {
        Review::new(&DocexConfig::default(), SchemaRegistry::embedded().unwrap()).unwrap()
    }

    fn invoice_result() -> ExtractionResult {
        process_invoice(json!({
            "invoice_number": "INV-7",
            "invoice_date": "2024-03-15",
            "vendor_name": "Acme Corp",
            "subtotal": 80.0,
            "tax": 8.0,
            "total": 90.0
        }))
    }

    fn process_invoice(reply: serde_json::Value) -> ExtractionResult {
        let mut config = DocexConfig::default();
        config.extraction.self_consistency_runs = 1;
        let model = Arc::new(ScriptedModel::repeating(ScriptedReply::json(reply)));
        let pipeline = Pipeline::new(&config, SchemaRegistry::embedded().unwrap(), model).unwrap();
        let doc = RawDocument::from_text("INVOICE INV-7 Acme Corp 2024-03-15 80.00 8.00 90.00")
            .with_hint(DocumentType::Invoice);
        tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(pipeline.process(&doc))
            .unwrap()
    }

    #[test]
    fn test_review_requires_valid_config() {
        let mut config = DocexConfig::default();
        config.confidence.agreement_weight = 0.9;
        assert!(Review::new(&config, SchemaRegistry::embedded().unwrap()).is_err());
    }

    #[test]
    fn test_review_requires_every_schema() {
        let err = Review::new(&DocexConfig::default(), SchemaRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaNotFound(_)));
    }

    #[test]
    fn test_revalidate_edit_fixes_arithmetic() {
        let result = invoice_result();
        assert!(result.issues.iter().any(|i| i.field == "total"));

        let edits = BTreeMap::from([("total".to_string(), Some("88.00".to_string()))]);
        let revised = review().revalidate(result, &edits).unwrap();

        assert_eq!(
            revised.record.get("total").and_then(FieldValue::as_decimal),
            Some(rust_decimal::Decimal::new(8800, 2))
        );
        assert!(!revised.issues.iter().any(|i| i.field == "total"));
        assert_eq!(revised.confidence.score("total"), Some(1.0));
    }

    #[test]
    fn test_revalidate_clear_required_field() {
        let result = invoice_result();
        let edits = BTreeMap::from([("invoice_number".to_string(), None)]);
        let revised = review().revalidate(result, &edits).unwrap();

        assert!(!revised.record.contains("invoice_number"));
        assert_eq!(revised.confidence.score("invoice_number"), Some(0.0));
        assert!(revised.warnings.contains(&PipelineWarning::ValidationFailed { errors: 1 }));
    }

    #[test]
    fn test_revalidate_unknown_field() {
        let result = invoice_result();
        let edits = BTreeMap::from([("colour".to_string(), Some("red".to_string()))]);
        let err = review().revalidate(result, &edits).unwrap_err();
        assert!(matches!(err, DocexError::UnknownField { .. }));
    }

    fn itemized_result() -> ExtractionResult {
        process_invoice(json!({
            "invoice_number": "INV-7",
            "invoice_date": "2024-03-15",
            "vendor_name": "Acme Corp",
            "subtotal": 25.0,
            "tax": 2.5,
            "total": 27.5,
            "items": [
                {"description": "Widget", "quantity": 2, "unit_price": 10.0, "total": 20.0},
                {"description": "Bolt", "quantity": 1, "unit_price": 5.0, "total": 6.0}
            ]
        }))
    }

    #[test]
    fn test_revalidate_cell_edit() {
        let result = itemized_result();
        let fields: Vec<&str> = result.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["subtotal", "items[1].total"]);
        let items_score = result.confidence.score("items");

        let edits = BTreeMap::from([("items[1].total".to_string(), Some("5.00".to_string()))]);
        let revised = review().revalidate(result, &edits).unwrap();

        assert_eq!(
            revised.record.get_path("items[1].total").and_then(FieldValue::as_decimal),
            Some(rust_decimal::Decimal::new(500, 2))
        );
        assert!(revised.issues.is_empty());
        assert_eq!(revised.confidence.score("items"), items_score);
    }

    #[test]
    fn test_revalidate_unknown_cell() {
        for path in ["items[2].total", "items[0].colour", "vendor_name[0].total"] {
            let edits = BTreeMap::from([(path.to_string(), Some("1".to_string()))]);
            let err = review().revalidate(itemized_result(), &edits).unwrap_err();
            assert!(matches!(err, DocexError::UnknownField { field, .. } if field == path));
        }
    }

    #[test]
    fn test_revalidate_whole_list_from_json() {
        let edits = BTreeMap::from([(
            "items".to_string(),
            Some(r#"[{"description": " Widget ", "quantity": "2", "unit_price": "$12.50", "total": 25}]"#.to_string()),
        )]);
        let revised = review().revalidate(itemized_result(), &edits).unwrap();

        let items = revised.record.get("items").and_then(FieldValue::as_list).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["description"], FieldValue::text("Widget"));
        assert_eq!(
            items[0]["unit_price"].as_decimal(),
            Some(rust_decimal::Decimal::new(1250, 2))
        );
        assert_eq!(revised.confidence.score("items"), Some(1.0));
        assert!(revised.issues.is_empty());
    }

    #[test]
    fn test_revalidate_clear_cell_of_required_column() {
        let edits = BTreeMap::from([("items[0].description".to_string(), None)]);
        let revised = review().revalidate(itemized_result(), &edits).unwrap();

        assert!(revised.record.get_path("items[0].description").is_none());
        assert!(revised.errors().any(|i| i.field == "items[0].description"));
    }
}
