//! Deterministic model for tests and offline runs.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use super::{GenerationRequest, GenerativeModel};
use crate::error::ModelError;

/// One canned answer.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Json(Value),
    Error(ModelError),
    /// Wait, then answer.
    Delayed(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn json(value: Value) -> Self {
        ScriptedReply::Json(value)
    }

    pub fn delayed(delay: Duration, reply: ScriptedReply) -> Self {
        ScriptedReply::Delayed(delay, Box::new(reply))
    }

    fn resolve(self) -> (Duration, Result<Value, ModelError>) {
        let mut delay = Duration::ZERO;
        let mut reply = self;
        loop {
            match reply {
                ScriptedReply::Json(value) => return (delay, Ok(value)),
                ScriptedReply::Error(err) => return (delay, Err(err)),
                ScriptedReply::Delayed(d, inner) => {
                    delay += d;
                    reply = *inner;
                }
            }
        }
    }
}

/// Answers calls from a queue, in call order.
///
/// The reply is taken when `generate_structured` is called, not when the
/// returned future is first polled, so the n-th call always gets the n-th reply.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<ScriptedReply>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same reply.
    pub fn repeating(reply: ScriptedReply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::default()
        }
    }

    /// Reply used once the queue runs dry.
    pub fn then_repeat(mut self, reply: ScriptedReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_reply(&self) -> ScriptedReply {
        let queued = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        queued
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| {
                ScriptedReply::Error(ModelError::Transport("script exhausted".to_string()))
            })
    }
}

impl GenerativeModel for ScriptedModel {
    fn generate_structured(
        &self,
        request: &GenerationRequest<'_>,
    ) -> impl Future<Output = Result<Value, ModelError>> + Send {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.prompt.to_string());
        let (delay, result) = self.next_reply().resolve();

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(schema: &Value) -> GenerationRequest<'_> {
        GenerationRequest {
            prompt: "extract",
            response_schema: schema,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_replies_in_call_order() {
        let model = ScriptedModel::new([
            ScriptedReply::json(json!({"a": 1})),
            ScriptedReply::Error(ModelError::Timeout),
        ]);
        let schema = json!({});
        let req = request(&schema);
        let first = model.generate_structured(&req);
        let second = model.generate_structured(&req);
        // Poll in reverse; order was fixed at call time
        assert_eq!(second.await, Err(ModelError::Timeout));
        assert_eq!(first.await, Ok(json!({"a": 1})));
        assert!(model.generate_structured(&req).await.is_err());
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_repeating() {
        let model = ScriptedModel::repeating(ScriptedReply::json(json!({"x": "y"})));
        let schema = json!({});
        let req = request(&schema);
        for _ in 0..3 {
            assert_eq!(
                model.generate_structured(&req).await,
                Ok(json!({"x": "y"}))
            );
        }
        assert_eq!(model.prompts(), vec!["extract"; 3]);
    }
}
