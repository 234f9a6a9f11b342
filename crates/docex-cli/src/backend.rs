//! Model backend selection: the Gemini API or a canned response file.

use std::path::Path;

use anyhow::Context;
use serde_json::Value;
use tracing::info;

use docex_core::models::config::ModelConfig;
use docex_core::{
    GeminiClient, GenerationRequest, GenerativeModel, ModelError, ScriptedModel, ScriptedReply,
};

/// The model the CLI talks to.
pub enum Backend {
    Gemini(GeminiClient),
    /// Replays responses from a file; the last one repeats once the file runs out.
    Replay(ScriptedModel),
}

impl Backend {
    pub fn build(config: &ModelConfig, responses: Option<&Path>) -> anyhow::Result<Self> {
        match responses {
            Some(path) => Self::replay(path),
            None => {
                let client = GeminiClient::from_env(config).with_context(|| {
                    format!(
                        "cannot reach model {}; set {} or pass --responses",
                        config.model, config.api_key_env
                    )
                })?;
                info!("Using model {}", client.model());
                Ok(Backend::Gemini(client))
            }
        }
    }

    fn replay(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read responses file {}", path.display()))?;
        let replies: Vec<Value> = serde_json::from_str(&content)
            .with_context(|| format!("{} must hold a JSON array", path.display()))?;
        let Some(last) = replies.last().cloned() else {
            anyhow::bail!("responses file {} is empty", path.display());
        };
        info!("Replaying {} responses from {}", replies.len(), path.display());

        let model = ScriptedModel::new(replies.into_iter().map(ScriptedReply::json))
            .then_repeat(ScriptedReply::json(last));
        Ok(Backend::Replay(model))
    }
}

impl GenerativeModel for Backend {
    async fn generate_structured(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<Value, ModelError> {
        match self {
            Backend::Gemini(client) => client.generate_structured(request).await,
            Backend::Replay(model) => model.generate_structured(request).await,
        }
    }
}
