//! Self-consistency extraction: N independent model calls, reconciled by vote.

pub mod vote;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ExtractionError, ModelError};
use crate::llm::{GenerationRequest, GenerativeModel, prompts};
use crate::models::config::ExtractionConfig;
use crate::models::record::{ExtractionAttempt, FieldValue, ListItem, ReconciledRecord};
use crate::schema::{ExtractionSchema, FieldSpec, FieldType};

pub use vote::reconcile;

/// Key of the optional per-field confidence object in model responses.
pub const CONFIDENCE_KEY: &str = "_confidence";

/// Runs extraction attempts against a model and reconciles them.
pub struct Extractor<M> {
    model: Arc<M>,
    max_concurrency: usize,
    attempt_timeout: Duration,
}

impl<M: GenerativeModel> Extractor<M> {
    pub fn new(model: Arc<M>, config: &ExtractionConfig) -> Self {
        Self {
            model,
            max_concurrency: config.max_concurrency.max(1),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }

    /// Override the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Run `run_count` attempts with the standard extraction prompt.
    pub async fn extract(
        &self,
        raw_text: &str,
        schema: &ExtractionSchema,
        run_count: usize,
    ) -> Result<ReconciledRecord, ExtractionError> {
        let prompt = prompts::extraction_prompt(schema, raw_text);
        self.extract_with_prompt(&prompt, schema, run_count, None)
            .await
    }

    /// Like [`Extractor::extract`], but no attempt runs past `deadline`.
    pub async fn extract_until(
        &self,
        raw_text: &str,
        schema: &ExtractionSchema,
        run_count: usize,
        deadline: Instant,
    ) -> Result<ReconciledRecord, ExtractionError> {
        let prompt = prompts::extraction_prompt(schema, raw_text);
        self.extract_with_prompt(&prompt, schema, run_count, Some(deadline))
            .await
    }

    /// Run `run_count` attempts of `prompt` and vote over the results.
    ///
    /// Attempts run at most `max_concurrency` at a time. Each is bounded by
    /// the attempt timeout and by `deadline`; a timed-out attempt is dropped,
    /// which cancels its call. Fails only when every attempt failed.
    pub async fn extract_with_prompt(
        &self,
        prompt: &str,
        schema: &ExtractionSchema,
        run_count: usize,
        deadline: Option<Instant>,
    ) -> Result<ReconciledRecord, ExtractionError> {
        if run_count == 0 {
            return Err(ExtractionError::NoRuns);
        }

        let response_schema = schema.response_schema();
        let request = GenerationRequest {
            prompt,
            response_schema: &response_schema,
            timeout: self.attempt_timeout,
        };
        let attempt_timeout = self.attempt_timeout;

        let outcomes: Vec<Result<ExtractionAttempt, String>> = stream::iter(0..run_count)
            .map(|index| {
                let call = self.model.generate_structured(&request);
                async move {
                    let mut attempt_deadline = Instant::now() + attempt_timeout;
                    if let Some(deadline) = deadline {
                        attempt_deadline = attempt_deadline.min(deadline);
                    }
                    let response = tokio::time::timeout_at(attempt_deadline, call)
                        .await
                        .unwrap_or(Err(ModelError::Timeout));
                    match response {
                        Ok(value) => parse_attempt(index, &value, schema),
                        Err(e) => Err(e.to_string()),
                    }
                }
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut attempts = Vec::with_capacity(run_count);
        let mut reasons = Vec::new();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(attempt) => {
                    debug!("Attempt {} proposed {} fields", index, attempt.fields.len());
                    attempts.push(attempt);
                }
                Err(reason) => {
                    warn!("Attempt {} failed: {}", index, reason);
                    reasons.push(format!("attempt {}: {}", index, reason));
                }
            }
        }

        if attempts.is_empty() {
            return Err(ExtractionError::AllAttemptsFailed {
                attempts: run_count,
                reasons,
            });
        }

        let record = reconcile(&attempts, schema);
        info!(
            "Reconciled {} fields from {}/{} successful attempts",
            record.len(),
            attempts.len(),
            run_count
        );
        Ok(record)
    }
}

/// Match one response against the schema.
///
/// Nested objects are flattened to dotted paths. Unknown fields, nulls,
/// empty strings and values of the wrong JSON primitive are dropped. List
/// fields take an array of objects whose cells are matched against the item
/// fields the same way; entries left with no cells are dropped. A response
/// that is not an object is a failed attempt.
pub fn parse_attempt(
    attempt_index: usize,
    response: &Value,
    schema: &ExtractionSchema,
) -> Result<ExtractionAttempt, String> {
    let Value::Object(object) = response else {
        return Err(format!(
            "malformed response: expected a JSON object, got {}",
            json_kind(response)
        ));
    };

    let mut flat = BTreeMap::new();
    flatten("", object, &mut flat);

    let mut attempt = ExtractionAttempt::empty(attempt_index);
    for spec in &schema.fields {
        let Some(value) = flat.get(spec.name.as_str()) else {
            continue;
        };
        let accepted = match (&spec.field_type, value) {
            (FieldType::List { items, .. }, Value::Array(entries)) => Some(FieldValue::List(
                entries
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|cells| parse_item(items, cells))
                    .filter(|item| !item.is_empty())
                    .collect(),
            )),
            (FieldType::List { .. }, _) => None,
            _ => parse_scalar(spec, value),
        };
        if let Some(accepted) = accepted {
            attempt.fields.insert(spec.name.clone(), accepted);
        }
    }

    if let Some(Value::Object(scores)) = object.get(CONFIDENCE_KEY) {
        let confidence: BTreeMap<String, f64> = scores
            .iter()
            .filter(|(field, _)| schema.field(field).is_some())
            .filter_map(|(field, score)| Some((field.clone(), score.as_f64()?)))
            .filter(|(_, score)| (0.0..=1.0).contains(score))
            .collect();
        if !confidence.is_empty() {
            attempt.model_confidence = Some(confidence);
        }
    }

    Ok(attempt)
}

fn parse_scalar(spec: &FieldSpec, value: &Value) -> Option<FieldValue> {
    let accepted = match (&spec.field_type, value) {
        (_, Value::String(s)) => !s.trim().is_empty(),
        (FieldType::String | FieldType::Number | FieldType::Enum { .. }, Value::Number(_)) => true,
        _ => false,
    };
    if !accepted {
        return None;
    }
    let raw = FieldValue::from_json(value)?;
    Some(spec.kind().canonicalize(&raw).unwrap_or_else(|| match raw {
        FieldValue::Text(s) => FieldValue::Text(s.trim().to_string()),
        other => other,
    }))
}

fn parse_item(specs: &[FieldSpec], cells: &Map<String, Value>) -> ListItem {
    specs
        .iter()
        .filter_map(|spec| Some((spec.name.clone(), parse_scalar(spec, cells.get(&spec.name)?)?)))
        .collect()
}

fn flatten<'a>(prefix: &str, object: &'a Map<String, Value>, out: &mut BTreeMap<String, &'a Value>) {
    for (key, value) in object {
        if prefix.is_empty() && key == CONFIDENCE_KEY {
            continue;
        }
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) => flatten(&path, inner, out),
            _ => {
                out.insert(path, value);
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
