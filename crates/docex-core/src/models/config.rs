//! Configuration structures for the extraction pipeline.

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration for the docex pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocexConfig {
    /// Self-consistency extraction configuration.
    pub extraction: ExtractionConfig,

    /// Confidence scoring configuration.
    pub confidence: ConfidenceConfig,

    /// Document classification configuration.
    pub classification: ClassificationConfig,

    /// Validation configuration.
    pub validation: ValidationConfig,

    /// Generative model configuration.
    pub model: ModelConfig,

    /// Document ingestion configuration.
    pub ingest: IngestConfig,

    /// Schema registry configuration.
    pub schemas: SchemaConfig,
}

/// Self-consistency extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Number of independent extraction calls per document (>= 1).
    pub self_consistency_runs: usize,

    /// Number of validation-driven retries per document.
    pub retry_budget: u32,

    /// Maximum extraction calls in flight at once.
    pub max_concurrency: usize,

    /// Timeout for a single extraction call, in seconds.
    pub attempt_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            self_consistency_runs: 3,
            retry_budget: 1,
            max_concurrency: 3,
            attempt_timeout_secs: 60,
        }
    }
}

/// Confidence scoring configuration. The four weights must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Fields scoring below this are reported as low confidence (0.0 - 1.0).
    pub low_confidence_threshold: f64,

    /// Weight of the self-consistency agreement ratio.
    pub agreement_weight: f64,

    /// Weight of the model-reported confidence.
    pub model_confidence_weight: f64,

    /// Weight of the text-presence heuristic.
    pub text_presence_weight: f64,

    /// Weight of the format-plausibility heuristic.
    pub format_weight: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 0.7,
            agreement_weight: 0.4,
            model_confidence_weight: 0.3,
            text_presence_weight: 0.2,
            format_weight: 0.1,
        }
    }
}

/// Document classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Top-two score difference below which the heuristics are ambiguous.
    pub ambiguity_margin: f64,

    /// Minimum heuristic score for a candidate to be considered at all.
    pub min_score: f64,

    /// Ask the model when the heuristics are ambiguous.
    pub model_fallback: bool,

    /// Timeout for the tie-breaking model call, in seconds.
    pub model_timeout_secs: u64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            ambiguity_margin: 2.0,
            min_score: 1.0,
            model_fallback: true,
            model_timeout_secs: 30,
        }
    }
}

/// Validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Absolute tolerance for arithmetic checks.
    pub tolerance: Decimal,

    /// Earliest plausible year for date fields.
    pub min_year: i32,

    /// How many years past the current one a date may lie.
    pub max_years_ahead: i32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            tolerance: Decimal::new(1, 2),
            min_year: 1900,
            max_years_ahead: 10,
        }
    }
}

/// Generative model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model name.
    pub model: String,

    /// API base URL.
    pub base_url: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Sampling temperature. Kept low but nonzero so attempts can disagree.
    pub temperature: f32,

    /// Maximum output tokens per call.
    pub max_output_tokens: u32,

    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 0.2,
            max_output_tokens: 2048,
            request_timeout_secs: 120,
        }
    }
}

/// Document ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Minimum embedded text length to treat a PDF as text-based.
    pub min_text_length: usize,

    /// Maximum PDF pages to OCR (0 = unlimited).
    pub max_pages: usize,

    /// Directory with `det.onnx`, `latin_rec.onnx` and `latin_dict.txt`.
    pub ocr_model_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_text_length: 50,
            max_pages: 10,
            ocr_model_dir: None,
        }
    }
}

/// Schema registry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Directory of `<document_type>.json` files overriding the built-in schemas.
    pub dir: Option<PathBuf>,
}

impl DocexConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check every option against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extraction.self_consistency_runs == 0 {
            return Err(ConfigError::invalid(
                "extraction.self_consistency_runs",
                "must be at least 1",
            ));
        }
        if self.extraction.max_concurrency == 0 {
            return Err(ConfigError::invalid(
                "extraction.max_concurrency",
                "must be at least 1",
            ));
        }
        if self.extraction.attempt_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "extraction.attempt_timeout_secs",
                "must be at least 1",
            ));
        }

        let c = &self.confidence;
        if !(0.0..=1.0).contains(&c.low_confidence_threshold) {
            return Err(ConfigError::invalid(
                "confidence.low_confidence_threshold",
                "must be within 0.0 - 1.0",
            ));
        }
        let weights = [
            ("confidence.agreement_weight", c.agreement_weight),
            ("confidence.model_confidence_weight", c.model_confidence_weight),
            ("confidence.text_presence_weight", c.text_presence_weight),
            ("confidence.format_weight", c.format_weight),
        ];
        for (key, weight) in weights {
            if !(0.0..=1.0).contains(&weight) {
                return Err(ConfigError::invalid(key, "must be within 0.0 - 1.0"));
            }
        }
        let sum: f64 = weights.iter().map(|(_, w)| w).sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::invalid(
                "confidence",
                format!("weights must sum to 1.0, got {:.4}", sum),
            ));
        }

        if self.classification.ambiguity_margin < 0.0 {
            return Err(ConfigError::invalid(
                "classification.ambiguity_margin",
                "must not be negative",
            ));
        }
        if self.classification.model_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "classification.model_timeout_secs",
                "must be at least 1",
            ));
        }
        if self.validation.tolerance.is_sign_negative() {
            return Err(ConfigError::invalid(
                "validation.tolerance",
                "must not be negative",
            ));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::invalid(
                "model.temperature",
                "must be within 0.0 - 2.0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DocexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.extraction.self_consistency_runs, 3);
        assert_eq!(config.extraction.retry_budget, 1);
        assert_eq!(config.confidence.low_confidence_threshold, 0.7);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = DocexConfig::default();
        config.confidence.format_weight = 0.3;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { ref key, .. } if key == "confidence"));
    }

    #[test]
    fn test_zero_runs_rejected() {
        let mut config = DocexConfig::default();
        config.extraction.self_consistency_runs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DocexConfig =
            serde_json::from_str(r#"{"extraction": {"self_consistency_runs": 5}}"#).unwrap();
        assert_eq!(config.extraction.self_consistency_runs, 5);
        assert_eq!(config.extraction.retry_budget, 1);
        assert_eq!(config.confidence.agreement_weight, 0.4);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = DocexConfig::default();
        config.extraction.retry_budget = 2;
        config.save(&path).unwrap();

        let loaded = DocexConfig::from_file(&path).unwrap();
        assert_eq!(loaded.extraction.retry_budget, 2);
        assert_eq!(loaded.validation.tolerance, config.validation.tolerance);
    }

    #[test]
    fn test_classifier_timeout_must_be_positive() {
        let mut config = DocexConfig::default();
        assert_eq!(config.classification.model_timeout_secs, 30);
        config.classification.model_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidOption { ref key, .. } if key == "classification.model_timeout_secs")
        );
    }

    #[test]
    fn test_tolerance_reads_numbers_and_strings() {
        let number: DocexConfig =
            serde_json::from_str(r#"{"validation": {"tolerance": 0.05}}"#).unwrap();
        let string: DocexConfig =
            serde_json::from_str(r#"{"validation": {"tolerance": "0.05"}}"#).unwrap();
        assert_eq!(number.validation.tolerance, string.validation.tolerance);
        assert_eq!(number.validation.tolerance.to_string(), "0.05");
    }
}
