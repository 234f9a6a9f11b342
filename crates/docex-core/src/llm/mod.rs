//! Boundary to the generative model.
//!
//! The model is a black box that turns a prompt plus a response schema into
//! a JSON value. Everything above this module only sees [`GenerativeModel`].

pub mod gemini;
pub mod prompts;
pub mod scripted;

use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use crate::error::ModelError;

pub use gemini::GeminiClient;
pub use scripted::{ScriptedModel, ScriptedReply};

/// One structured-generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    /// OpenAPI-style schema the response should follow.
    pub response_schema: &'a Value,
    /// Upper bound the implementation should apply to the call itself.
    pub timeout: Duration,
}

/// A generative model that answers prompts with JSON.
pub trait GenerativeModel: Send + Sync {
    /// Run one call. Implementations must not retry internally.
    fn generate_structured(
        &self,
        request: &GenerationRequest<'_>,
    ) -> impl Future<Output = Result<Value, ModelError>> + Send;
}

/// Recover a JSON value from model text: plain JSON, a fenced block, or the
/// outermost `{...}` inside surrounding prose.
pub fn recover_json(text: &str) -> Result<Value, ModelError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(start) = trimmed.find("```") {
        let body = &trimmed[start + 3..];
        let body = body.strip_prefix("json").unwrap_or(body);
        if let Some(end) = body.find("```") {
            if let Ok(value) = serde_json::from_str(body[..end].trim()) {
                return Ok(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    let preview: String = trimmed.chars().take(80).collect();
    Err(ModelError::MalformedResponse(format!(
        "no JSON found in response: {}",
        preview
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recover_plain_json() {
        assert_eq!(recover_json(r#" {"total": 90} "#).unwrap(), json!({"total": 90}));
    }

    #[test]
    fn test_recover_fenced_json() {
        let text = "Here you go:\n```json\n{\"total\": 90}\n```\nLet me know.";
        assert_eq!(recover_json(text).unwrap(), json!({"total": 90}));
    }

    #[test]
    fn test_recover_embedded_object() {
        let text = "The extracted data is {\"vendor_name\": \"Acme\"} as requested.";
        assert_eq!(recover_json(text).unwrap(), json!({"vendor_name": "Acme"}));
    }

    #[test]
    fn test_recover_fails_on_prose() {
        let err = recover_json("I could not read the document.").unwrap_err();
        assert!(matches!(err, ModelError::MalformedResponse(_)));
    }
}
