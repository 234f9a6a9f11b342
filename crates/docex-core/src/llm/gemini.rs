//! Google Gemini `generateContent` client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{GenerationRequest, GenerativeModel, recover_json};
use crate::error::ModelError;
use crate::models::config::ModelConfig;

/// HTTP client for the Gemini REST API.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    /// Build a client with the API key read from `config.api_key_env`.
    pub fn from_env(config: &ModelConfig) -> Result<Self, ModelError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ModelError::MissingApiKey(config.api_key_env.clone()))?;
        Self::new(config, api_key)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn body<'a>(&self, request: &GenerationRequest<'a>) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: "application/json",
                response_schema: request.response_schema,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
    response_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Concatenated text of the first candidate.
fn candidate_text(response: GenerateContentResponse) -> Result<String, ModelError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::MalformedResponse("response has no candidates".to_string()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(ModelError::MalformedResponse(format!(
            "empty candidate (finish reason: {})",
            reason
        )));
    }
    Ok(text)
}

impl GenerativeModel for GeminiClient {
    async fn generate_structured(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<Value, ModelError> {
        debug!("Calling {} ({} prompt chars)", self.model, request.prompt.len());

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .timeout(request.timeout)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Model endpoint returned {}", status);
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;

        recover_json(&candidate_text(parsed)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let client = GeminiClient::new(&ModelConfig::default(), "key").unwrap();
        let schema = json!({"type": "OBJECT"});
        let request = GenerationRequest {
            prompt: "extract this",
            response_schema: &schema,
            timeout: Duration::from_secs(5),
        };
        let body = serde_json::to_value(client.body(&request)).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "extract this");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "OBJECT");
        assert!(client.endpoint().ends_with("/v1beta/models/gemini-1.5-flash:generateContent"));
    }

    #[test]
    fn test_candidate_text() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "{\"total\": "}, {"text": "90}"}]}}]
        }))
        .unwrap();
        let text = candidate_text(response).unwrap();
        assert_eq!(recover_json(&text).unwrap(), json!({"total": 90}));
    }

    #[test]
    fn test_empty_candidate_is_malformed() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }))
        .unwrap();
        let err = candidate_text(response).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));

        let none: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert!(candidate_text(none).is_err());
    }

    #[test]
    fn test_missing_api_key() {
        let config = ModelConfig {
            api_key_env: "DOCEX_TEST_KEY_THAT_IS_NOT_SET".to_string(),
            ..ModelConfig::default()
        };
        assert!(matches!(
            GeminiClient::from_env(&config),
            Err(ModelError::MissingApiKey(_))
        ));
    }
}
