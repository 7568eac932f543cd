//! Chat agent driver.
//!
//! Consumes `llm.chat`, calls the configured model through the
//! completion client, and emits `llm.chat.response` with the reply and
//! token usage.  Reserved metadata (`request_id`, `session_id`,
//! `turn_number`, `correlation_id`) is echoed into the response so edges
//! and the conversation manager can correlate it.  Usage is recorded in
//! the model registry.

use std::sync::Arc;

use serde_json::json;

use vx_conversations::ChatMessage;
use vx_domain::error::{Error, Result};
use vx_domain::event::EventMessage;
use vx_registry::{Driver, DriverKind, DriverManifest, ModelRegistry, UsageRecord};

use crate::completion::{CompletionClient, CompletionRequest};

const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct ChatAgentDriver {
    manifest: DriverManifest,
    completion: Arc<dyn CompletionClient>,
    models: Arc<ModelRegistry>,
    default_model: String,
}

impl ChatAgentDriver {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        models: Arc<ModelRegistry>,
        default_model: Option<String>,
    ) -> Self {
        Self {
            manifest: DriverManifest::new("chat_agent", "Chat Agent", DriverKind::Agent)
                .with_capability("llm.chat")
                .with_description("Handles chat completions through the model registry"),
            completion,
            models,
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.into()),
        }
    }

    fn parse_messages(event: &EventMessage) -> Result<Vec<ChatMessage>> {
        let messages = event
            .data
            .get("messages")
            .cloned()
            .ok_or_else(|| Error::InvalidInput("chat event has no messages".into()))?;
        let messages: Vec<ChatMessage> = serde_json::from_value(messages)
            .map_err(|e| Error::InvalidInput(format!("malformed messages: {e}")))?;
        if messages.is_empty() {
            return Err(Error::InvalidInput("chat event has no messages".into()));
        }
        Ok(messages)
    }
}

#[async_trait::async_trait]
impl Driver for ChatAgentDriver {
    fn manifest(&self) -> &DriverManifest {
        &self.manifest
    }

    async fn handle(&self, event: &EventMessage) -> Result<Vec<EventMessage>> {
        // Capability routing is prefix-based, so our own response events
        // come back through here; ignore everything but the request type.
        if event.event_type != "llm.chat" {
            return Ok(Vec::new());
        }

        let messages = Self::parse_messages(event)?;
        let model = event
            .data
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.default_model)
            .to_owned();
        let temperature = event
            .data
            .get("temperature")
            .and_then(|t| t.as_f64())
            .map(|t| t as f32);

        let response = self
            .completion
            .complete(CompletionRequest {
                model: model.clone(),
                messages,
                temperature,
                max_tokens: None,
            })
            .await?;

        // Cost-account the request when the model is in the catalog.
        let user_id = event.effective_user_id();
        if !user_id.is_empty() {
            let cost = self
                .models
                .get(&model)
                .map(|spec| {
                    spec.cost_for(response.usage.prompt_tokens, response.usage.completion_tokens)
                })
                .unwrap_or(0.0);
            let record = UsageRecord {
                model_id: model.clone(),
                user_id: user_id.to_owned(),
                timestamp: chrono::Utc::now(),
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
                total_tokens: response.usage.total_tokens,
                cost,
                request_id: event.request_id().unwrap_or(&event.id).to_owned(),
            };
            if let Err(e) = self.models.track_usage(record).await {
                tracing::warn!(error = %e, "failed to record chat usage");
            }
        }

        let mut reply = EventMessage::new(
            "llm.chat.response",
            json!({
                "response": response.content,
                "model": model,
                "usage": response.usage,
            }),
        )
        .with_source(self.manifest.id.clone());
        reply.user_id = event.user_id.clone();
        // Echo the reserved correlation metadata.
        for key in ["request_id", "session_id", "correlation_id", "turn_number"] {
            if let Some(value) = event.metadata.get(key) {
                reply.metadata.insert(key.into(), value.clone());
            }
        }
        Ok(vec![reply])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::ScriptedClient;
    use serde_json::json;

    fn driver(responses: Vec<&'static str>) -> (ChatAgentDriver, Arc<ModelRegistry>) {
        let models = Arc::new(ModelRegistry::new());
        let driver = ChatAgentDriver::new(
            Arc::new(ScriptedClient::new(responses)),
            models.clone(),
            None,
        );
        (driver, models)
    }

    fn chat_event(content: &str) -> EventMessage {
        let mut event = EventMessage::new(
            "llm.chat",
            json!({
                "messages": [{"role": "user", "content": content}],
                "model": "gpt-3.5-turbo"
            }),
        )
        .with_user_id("u1")
        .with_session_id("s1")
        .with_request_id("r1");
        event.set_turn_number(1);
        event
    }

    #[tokio::test]
    async fn responds_with_echoed_metadata() {
        let (driver, models) = driver(vec!["Hello there!"]);
        let outputs = driver.handle(&chat_event("Hello")).await.unwrap();

        assert_eq!(outputs.len(), 1);
        let reply = &outputs[0];
        assert_eq!(reply.event_type, "llm.chat.response");
        assert_eq!(reply.data.get("response"), Some(&json!("Hello there!")));
        assert_eq!(reply.request_id(), Some("r1"));
        assert_eq!(reply.session_id(), Some("s1"));
        assert_eq!(reply.turn_number(), Some(1));
        assert_eq!(reply.user_id, "u1");

        // Usage was recorded against the user.
        let stats = models.get_usage_stats(Some("u1"));
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.total_tokens, 15);
        assert!(stats.requests_by_model.contains_key("gpt-3.5-turbo"));
    }

    #[tokio::test]
    async fn ignores_non_chat_types() {
        let (driver, _models) = driver(vec![]);
        let response_event = EventMessage::new("llm.chat.response", json!({"response": "x"}));
        assert!(driver.handle(&response_event).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_messages_is_invalid_input() {
        let (driver, _models) = driver(vec![]);
        let bad = EventMessage::new("llm.chat", json!({}));
        let err = driver.handle(&bad).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let empty = EventMessage::new("llm.chat", json!({"messages": []}));
        let err = driver.handle(&empty).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn falls_back_to_default_model() {
        let (driver, _models) = driver(vec!["ok"]);
        let event = EventMessage::new(
            "llm.chat",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        );
        let outputs = driver.handle(&event).await.unwrap();
        assert_eq!(outputs[0].data.get("model"), Some(&json!("gpt-4o-mini")));
    }
}
