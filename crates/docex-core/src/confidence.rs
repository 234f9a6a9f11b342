//! Per-field and document-level confidence scoring.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::config::ConfidenceConfig;
use crate::models::record::{Agreement, FieldValue, ReconciledRecord};
use crate::models::report::{DocumentConfidence, FieldConfidence, Signal};
use crate::normalize::{amount_spans, casefold, dates_in_text, parse_date, token_overlap};
use crate::schema::{ExtractionSchema, FieldSpec, FieldType};

/// Model confidence assumed when the model did not report one.
pub const NEUTRAL_MODEL_CONFIDENCE: f64 = 0.5;

const REQUIRED_WEIGHT: f64 = 2.0;
const OPTIONAL_WEIGHT: f64 = 1.0;

/// Scores reconciled records.
#[derive(Debug, Clone)]
pub struct ConfidenceEngine {
    config: ConfidenceConfig,
}

/// Distribution of field scores, for reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSummary {
    pub overall_confidence: f64,
    pub field_count: usize,
    pub low_confidence_count: usize,
    /// Fields scoring >= 0.8.
    pub high: usize,
    /// Fields scoring 0.5 - 0.8.
    pub medium: usize,
    /// Fields scoring < 0.5.
    pub low: usize,
    pub average_confidence: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,
}

impl ConfidenceEngine {
    pub fn new(config: &ConfidenceConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.config.low_confidence_threshold
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.config.low_confidence_threshold = threshold;
        self
    }

    /// Score every field of `record` plus every missing required field.
    pub fn score(
        &self,
        record: &ReconciledRecord,
        raw_text: &str,
        schema: &ExtractionSchema,
    ) -> DocumentConfidence {
        let mut field_scores = BTreeMap::new();

        for spec in &schema.fields {
            let scored = match record.get(&spec.name) {
                Some(value) => self.score_field(
                    spec,
                    value,
                    record.agreement.get(&spec.name).copied(),
                    record.model_confidence.get(&spec.name).copied(),
                    raw_text,
                ),
                None if spec.required => missing(&spec.name),
                None => continue,
            };
            field_scores.insert(spec.name.clone(), scored);
        }

        self.aggregate(field_scores, schema)
    }

    /// Weighted combination of the four signals for one present field.
    pub fn score_field(
        &self,
        spec: &FieldSpec,
        value: &FieldValue,
        agreement: Option<Agreement>,
        model_confidence: Option<f64>,
        raw_text: &str,
    ) -> FieldConfidence {
        let c = &self.config;
        let signals = vec![
            Signal::new(
                "agreement",
                c.agreement_weight,
                agreement.map(|a| a.ratio()).unwrap_or(0.0),
            ),
            Signal::new(
                "model_confidence",
                c.model_confidence_weight,
                model_confidence
                    .unwrap_or(NEUTRAL_MODEL_CONFIDENCE)
                    .clamp(0.0, 1.0),
            ),
            Signal::new(
                "text_presence",
                c.text_presence_weight,
                text_presence(value, &spec.field_type, raw_text),
            ),
            Signal::new("format", c.format_weight, spec.kind().plausibility(value)),
        ];

        let score = signals
            .iter()
            .map(|s| s.weight * s.value)
            .sum::<f64>()
            .clamp(0.0, 1.0);

        FieldConfidence {
            field: spec.name.clone(),
            score,
            contributing_signals: signals,
        }
    }

    /// Document-level report from field scores. Required fields weigh twice
    /// as much as optional ones; an empty set scores 0.0.
    pub fn aggregate(
        &self,
        field_scores: BTreeMap<String, FieldConfidence>,
        schema: &ExtractionSchema,
    ) -> DocumentConfidence {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for (name, fc) in &field_scores {
            let weight = match schema.field(name) {
                Some(spec) if spec.required => REQUIRED_WEIGHT,
                _ => OPTIONAL_WEIGHT,
            };
            weighted += weight * fc.score;
            total_weight += weight;
        }
        let overall_score = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let low_confidence_fields: BTreeSet<String> = field_scores
            .iter()
            .filter(|(_, fc)| fc.score < self.config.low_confidence_threshold)
            .map(|(name, _)| name.clone())
            .collect();

        debug!(
            "Overall confidence {:.3} over {} fields, {} below threshold",
            overall_score,
            field_scores.len(),
            low_confidence_fields.len()
        );

        DocumentConfidence {
            overall_score,
            field_scores,
            low_confidence_fields,
        }
    }

    pub fn summary(&self, confidence: &DocumentConfidence) -> ConfidenceSummary {
        let scores: Vec<f64> = confidence.field_scores.values().map(|f| f.score).collect();
        let count = scores.len();
        let average = if count == 0 {
            0.0
        } else {
            scores.iter().sum::<f64>() / count as f64
        };

        ConfidenceSummary {
            overall_confidence: confidence.overall_score,
            field_count: count,
            low_confidence_count: confidence.low_confidence_fields.len(),
            high: scores.iter().filter(|s| **s >= 0.8).count(),
            medium: scores.iter().filter(|s| (0.5..0.8).contains(*s)).count(),
            low: scores.iter().filter(|s| **s < 0.5).count(),
            average_confidence: average,
            min_confidence: scores.iter().copied().reduce(f64::min).unwrap_or(0.0),
            max_confidence: scores.iter().copied().reduce(f64::max).unwrap_or(0.0),
        }
    }
}

/// Score for a required field the record does not contain.
pub fn missing(field: &str) -> FieldConfidence {
    FieldConfidence {
        field: field.to_string(),
        score: 0.0,
        contributing_signals: vec![Signal::new("missing", 1.0, 0.0)],
    }
}

/// Score for a value a person entered by hand.
pub fn manual_edit(field: &str) -> FieldConfidence {
    FieldConfidence {
        field: field.to_string(),
        score: 1.0,
        contributing_signals: vec![Signal::new("manual_edit", 1.0, 1.0)],
    }
}

/// How well the source text supports a value (0.0 - 1.0).
///
/// Exact substring 1.0, an equivalent number or date elsewhere in the text
/// 0.95, case- and whitespace-insensitive substring 0.9, partial token
/// overlap 0.3 - 0.7, otherwise 0.1. Numbers only match standalone amounts
/// in the text, never digits inside longer numbers, dates or identifiers.
/// A list scores the mean over its cells; an empty list scores 0.1.
pub fn text_presence(value: &FieldValue, field_type: &FieldType, raw_text: &str) -> f64 {
    if let FieldValue::List(items) = value {
        let Some((specs, _)) = field_type.as_list() else {
            return 0.1;
        };
        let scores: Vec<f64> = items
            .iter()
            .flat_map(|item| {
                specs.iter().filter_map(|spec| {
                    let cell = item.get(&spec.name)?;
                    Some(text_presence(cell, &spec.field_type, raw_text))
                })
            })
            .collect();
        if scores.is_empty() {
            return 0.1;
        }
        return scores.iter().sum::<f64>() / scores.len() as f64;
    }

    let rendered = value.to_string();
    if rendered.is_empty() || raw_text.is_empty() {
        return 0.1;
    }

    if let FieldValue::Number(d) = value {
        let mut best = 0.1;
        for (span, amount) in amount_spans(raw_text) {
            if amount == *d {
                if span.contains(&rendered) {
                    return 1.0;
                }
                best = 0.95;
            }
        }
        return best;
    }

    if raw_text.contains(&rendered) {
        return 1.0;
    }

    if let (FieldValue::Text(s), FieldType::Date) = (value, field_type) {
        if let Some(date) = parse_date(s) {
            if dates_in_text(raw_text).contains(&date) {
                return 0.95;
            }
        }
    }

    if casefold(raw_text).contains(&casefold(&rendered)) {
        return 0.9;
    }

    if let FieldValue::Text(s) = value {
        let overlap = token_overlap(s, raw_text);
        if overlap > 0.0 {
            return 0.3 + 0.4 * overlap;
        }
    }

    0.1
}
