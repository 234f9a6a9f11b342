//! Document type classification.
//!
//! Keyword and pattern heuristics decide clear cases. When the top two
//! candidates are too close, one classification-only model call breaks the tie.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm::{GenerationRequest, GenerativeModel, prompts};
use crate::models::config::ClassificationConfig;
use crate::models::document::DocumentType;
use crate::models::report::{Classification, ClassificationMethod};

/// Confidence assigned to a label chosen by the model.
pub const MODEL_CONFIDENCE: f64 = 0.75;

const KEYWORD_WEIGHT: f64 = 1.0;
const PATTERN_WEIGHT: f64 = 2.0;

struct TypeRules {
    document_type: DocumentType,
    keywords: Vec<Regex>,
    patterns: Vec<Regex>,
}

fn word_rules(fragments: &[&str]) -> Vec<Regex> {
    fragments
        .iter()
        .map(|f| Regex::new(&format!(r"(?i)\b(?:{})\b", f)).unwrap())
        .collect()
}

fn pattern_rules(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
        .collect()
}

lazy_static! {
    static ref RULES: Vec<TypeRules> = vec![
        TypeRules {
            document_type: DocumentType::Invoice,
            keywords: word_rules(&[
                "invoice",
                "bill to",
                "ship to",
                "sold to",
                "subtotal",
                "sales tax",
                "vat",
                "total due",
                "remit to",
                "unit price",
                "qty",
                "quantity",
                "purchase order",
                "net 30",
            ]),
            patterns: pattern_rules(&[
                r"\binvoice\s*(?:#|no\.?|number)?\s*:?\s*[a-z]*-?\d+",
                r"\binvoice\s+(?:number|date)",
                r"\b(?:bill|ship)\s+to\s*:",
                r"\bsubtotal\b.{0,20}\d",
            ]),
        },
        TypeRules {
            document_type: DocumentType::Bill,
            keywords: word_rules(&[
                "statement",
                "account number",
                "billing period",
                "service period",
                "previous balance",
                "current charges",
                "payment due",
                "amount due",
                "usage",
                "meter reading",
                "kwh",
                "kilowatt",
                "gallons",
                "utility",
            ]),
            patterns: pattern_rules(&[
                r"\baccount\s*(?:#|no\.?|number)\s*:?\s*\d",
                r"\bstatement\s+date",
                r"\bbilling\s+period",
                r"\bprevious\s+balance\b.{0,20}\d",
                r"\b\d+(?:\.\d+)?\s*kwh\b",
            ]),
        },
        TypeRules {
            document_type: DocumentType::Prescription,
            keywords: word_rules(&[
                "prescription",
                "rx",
                "prescribed",
                "prescriber",
                "medication",
                "pharmacy",
                "patient",
                "dosage",
                "refills?",
                "ndc",
                "tablets?",
                "capsules?",
                "sig",
                "dispense",
            ]),
            patterns: pattern_rules(&[
                r"\brx\s*#?\s*:?\s*\d+",
                r"\bprescription\s*#\s*\d+",
                r"\b\d+(?:\.\d+)?\s*(?:mg|mcg|ml)\b",
                r"\btake\s+\d+.{0,40}\b(?:daily|times|hours)\b",
                r"\brefills?\s*:?\s*\d+",
            ]),
        },
    ];
}

/// Heuristic and model-assisted classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    config: ClassificationConfig,
}

impl Classifier {
    pub fn new(config: &ClassificationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Heuristic score per candidate: +1 per keyword, +2 per pattern.
    pub fn scores(&self, text: &str) -> BTreeMap<DocumentType, f64> {
        RULES
            .iter()
            .map(|rules| {
                let keywords = rules.keywords.iter().filter(|r| r.is_match(text)).count();
                let patterns = rules.patterns.iter().filter(|r| r.is_match(text)).count();
                let score = keywords as f64 * KEYWORD_WEIGHT + patterns as f64 * PATTERN_WEIGHT;
                (rules.document_type, score)
            })
            .collect()
    }

    /// Classify from heuristics alone. `None` when the result is ambiguous.
    pub fn classify_heuristic(
        &self,
        text: &str,
    ) -> (Option<Classification>, BTreeMap<DocumentType, f64>) {
        let scores = self.scores(text);
        let (top_type, top, second) = top_two(&scores);

        if top < self.config.min_score || top - second < self.config.ambiguity_margin {
            debug!(
                "Heuristics ambiguous: top {} = {:.1}, runner-up {:.1}",
                top_type, top, second
            );
            return (None, scores);
        }

        let confidence = heuristic_confidence(top, second);
        info!(
            "Heuristic classification: {} (confidence: {:.2})",
            top_type, confidence
        );
        let classification = Classification {
            document_type: top_type,
            confidence,
            method: ClassificationMethod::Heuristic,
            scores: scores.clone(),
        };
        (Some(classification), scores)
    }

    /// Classify, asking `model` once when the heuristics are ambiguous. Never fails.
    pub async fn classify<M: GenerativeModel>(
        &self,
        text: &str,
        model: Option<&M>,
    ) -> Classification {
        self.classify_until(text, model, None).await
    }

    /// Like [`Classifier::classify`], but the model call never runs past `deadline`.
    pub async fn classify_until<M: GenerativeModel>(
        &self,
        text: &str,
        model: Option<&M>,
        deadline: Option<Instant>,
    ) -> Classification {
        let (decided, scores) = self.classify_heuristic(text);
        if let Some(classification) = decided {
            return classification;
        }

        let model = model.filter(|_| self.config.model_fallback);
        if let Some(model) = model {
            let timeout = Duration::from_secs(self.config.model_timeout_secs);
            let mut call_deadline = Instant::now() + timeout;
            if let Some(deadline) = deadline {
                call_deadline = call_deadline.min(deadline);
            }
            match ask_model(model, text, timeout, call_deadline).await {
                Ok(document_type) => {
                    info!("Model classification: {}", document_type);
                    return Classification {
                        document_type,
                        confidence: MODEL_CONFIDENCE,
                        method: ClassificationMethod::Model,
                        scores,
                    };
                }
                Err(reason) => warn!("Model classification failed: {}", reason),
            }
        }

        self.fallback(scores)
    }

    fn fallback(&self, scores: BTreeMap<DocumentType, f64>) -> Classification {
        let (top_type, top, second) = top_two(&scores);
        let (document_type, confidence) = if top >= self.config.min_score {
            (top_type, heuristic_confidence(top, second) / 2.0)
        } else {
            (DocumentType::Unknown, 0.0)
        };
        warn!(
            "Falling back to {} (confidence: {:.2})",
            document_type, confidence
        );
        Classification {
            document_type,
            confidence,
            method: ClassificationMethod::Fallback,
            scores,
        }
    }
}

/// Best candidate (earliest on ties), its score, and the runner-up score.
fn top_two(scores: &BTreeMap<DocumentType, f64>) -> (DocumentType, f64, f64) {
    let mut ranked: Vec<(DocumentType, f64)> = DocumentType::CANDIDATES
        .iter()
        .map(|t| (*t, scores.get(t).copied().unwrap_or(0.0)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let (top_type, top) = ranked[0];
    (top_type, top, ranked[1].1)
}

fn heuristic_confidence(top: f64, second: f64) -> f64 {
    if second > 0.0 {
        (top / (top + second)).min(0.95)
    } else {
        (0.6 + 0.1 * top).min(0.95)
    }
}

async fn ask_model<M: GenerativeModel>(
    model: &M,
    text: &str,
    timeout: Duration,
    deadline: Instant,
) -> Result<DocumentType, String> {
    let prompt = prompts::classification_prompt(text);
    let schema = prompts::classification_schema();
    let request = GenerationRequest {
        prompt: &prompt,
        response_schema: &schema,
        timeout,
    };

    let response = tokio::time::timeout_at(deadline, model.generate_structured(&request))
        .await
        .map_err(|_| "timed out".to_string())?
        .map_err(|e| e.to_string())?;

    let label = match &response {
        Value::Object(obj) => obj.get("document_type").and_then(Value::as_str),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }
    .ok_or_else(|| format!("no document_type in response: {}", response))?;

    label
        .parse::<DocumentType>()
        .ok()
        .filter(|t| DocumentType::CANDIDATES.contains(t))
        .ok_or_else(|| format!("invalid label '{}'", label))
}
