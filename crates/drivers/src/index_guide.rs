//! Index-guide generator driver.
//!
//! When a folder is created in the context hub, generates a contextual
//! index guide for it with the LLM and emits
//! `context.index_guide.generated` carrying the markdown content.

use std::sync::Arc;

use serde_json::json;

use vx_conversations::ChatMessage;
use vx_domain::error::{Error, Result};
use vx_domain::event::EventMessage;
use vx_registry::{Driver, DriverKind, DriverManifest, ResourceSpec};

use crate::completion::{CompletionClient, CompletionRequest};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const RESPONSE_EVENT_TYPE: &str = "context.index_guide.generated";

const SYSTEM_PROMPT: &str = "\
You are an expert at creating helpful index guides for folders in a \
personal knowledge management system.\n\n\
Your task is to generate a comprehensive index guide for a specific \
folder based on:\n\
1. The folder name and its purpose\n\
2. The folder's position in the hierarchy\n\
3. The types of content that would logically belong in this folder\n\n\
Guidelines for creating index guides:\n\
- Start with a clear purpose statement for the folder\n\
- Provide specific organization guidelines relevant to the folder's content\n\
- Include best practices that make sense for this type of content\n\
- Consider the folder's relationship to parent and sibling folders\n\
- Make recommendations concrete and actionable\n\
- Use markdown formatting with proper headers\n\n\
Keep the tone helpful and professional. Focus on practical guidance \
rather than generic advice.";

pub struct IndexGuideDriver {
    manifest: DriverManifest,
    completion: Arc<dyn CompletionClient>,
    model: String,
}

impl IndexGuideDriver {
    pub fn new(completion: Arc<dyn CompletionClient>, model: Option<String>) -> Self {
        Self {
            manifest: DriverManifest::new(
                "index_guide_generator",
                "Index Guide Generator",
                DriverKind::Agent,
            )
            .with_capability("llm.index_guide.generate")
            .with_capability("folder.created")
            .with_description("Generates contextual index guides for folders using the LLM")
            .with_resources(ResourceSpec {
                memory_mb: 512,
                timeout_seconds: 30,
            }),
            completion,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.into()),
        }
    }

    fn build_prompt(
        folder_name: &str,
        folder_path: &str,
        parents: &[String],
        siblings: &[String],
    ) -> String {
        let mut parts = vec![
            format!("Generate an index guide for the folder: '{folder_name}'"),
            format!("\nFull path: {folder_path}"),
        ];
        if !parents.is_empty() {
            parts.push(format!("\nParent folders: {}", parents.join(", ")));
        }
        // System folders (underscore-prefixed) are noise to the model.
        let user_siblings: Vec<&str> = siblings
            .iter()
            .filter(|s| !s.starts_with('_'))
            .map(String::as_str)
            .take(10)
            .collect();
        if !user_siblings.is_empty() {
            parts.push(format!("\nSibling folders: {}", user_siblings.join(", ")));
        }
        parts.push("\n\nCreate a comprehensive, practical index guide for this folder.".into());
        parts.join("\n")
    }
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl Driver for IndexGuideDriver {
    fn manifest(&self) -> &DriverManifest {
        &self.manifest
    }

    async fn handle(&self, event: &EventMessage) -> Result<Vec<EventMessage>> {
        if event.event_type != "llm.index_guide.generate"
            && event.event_type != "folder.created"
        {
            return Ok(Vec::new());
        }

        let folder_name = event
            .data
            .get("folder_name")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let folder_id = event
            .data
            .get("folder_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if folder_name.is_empty() || folder_id.is_empty() {
            return Err(Error::InvalidInput(
                "index guide request needs folder_name and folder_id".into(),
            ));
        }
        let folder_path = event
            .data
            .get("folder_path")
            .and_then(|v| v.as_str())
            .unwrap_or(folder_name);
        let parents = string_list(event.data.get("parent_folders"));
        let siblings = string_list(event.data.get("sibling_folders"));

        let prompt = Self::build_prompt(folder_name, folder_path, &parents, &siblings);
        let response = self
            .completion
            .complete(CompletionRequest {
                model: self.model.clone(),
                messages: vec![
                    ChatMessage {
                        role: "system".into(),
                        content: SYSTEM_PROMPT.into(),
                    },
                    ChatMessage::user(prompt),
                ],
                temperature: None,
                max_tokens: None,
            })
            .await?;

        let response_type = event
            .data
            .get("response_event_type")
            .and_then(|v| v.as_str())
            .unwrap_or(RESPONSE_EVENT_TYPE);

        let mut generated = EventMessage::new(
            response_type,
            json!({
                "folder_id": folder_id,
                "folder_name": folder_name,
                "folder_path": folder_path,
                "content": response.content,
                "format": "markdown",
            }),
        )
        .with_source(self.manifest.id.clone());
        generated.user_id = event.user_id.clone();
        if let Some(correlation) = event.metadata.get("correlation_id") {
            generated
                .metadata
                .insert("correlation_id".into(), correlation.clone());
        }
        Ok(vec![generated])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::ScriptedClient;

    fn folder_event(event_type: &str) -> EventMessage {
        EventMessage::new(
            event_type,
            json!({
                "folder_id": "f1",
                "folder_name": "Projects",
                "folder_path": "/work/Projects",
                "parent_folders": ["work"],
                "sibling_folders": ["Archive", "_index.guide", "Notes"],
            }),
        )
        .with_user_id("u1")
    }

    #[tokio::test]
    async fn generates_a_guide_for_folder_created() {
        let client = Arc::new(ScriptedClient::new(vec!["# Projects\n\nA guide."]));
        let driver = IndexGuideDriver::new(client.clone(), None);

        let outputs = driver.handle(&folder_event("folder.created")).await.unwrap();
        assert_eq!(outputs.len(), 1);
        let generated = &outputs[0];
        assert_eq!(generated.event_type, "context.index_guide.generated");
        assert_eq!(generated.data.get("folder_id"), Some(&json!("f1")));
        assert_eq!(generated.data.get("format"), Some(&json!("markdown")));
        assert_eq!(
            generated.data.get("content"),
            Some(&json!("# Projects\n\nA guide."))
        );
        assert_eq!(generated.user_id, "u1");

        // The prompt carried the hierarchy but not system folders.
        let requests = client.requests.lock();
        let prompt = &requests[0].messages[1].content;
        assert!(prompt.contains("'Projects'"));
        assert!(prompt.contains("work"));
        assert!(prompt.contains("Archive"));
        assert!(!prompt.contains("_index.guide"));
    }

    #[tokio::test]
    async fn explicit_generate_requests_are_handled_too() {
        let client = Arc::new(ScriptedClient::new(vec!["guide"]));
        let driver = IndexGuideDriver::new(client, None);
        let outputs = driver
            .handle(&folder_event("llm.index_guide.generate"))
            .await
            .unwrap();
        assert_eq!(outputs.len(), 1);
    }

    #[tokio::test]
    async fn missing_folder_info_is_invalid() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let driver = IndexGuideDriver::new(client, None);
        let bad = EventMessage::new("folder.created", json!({"folder_name": "x"}));
        let err = driver.handle(&bad).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unrelated_events_are_ignored() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let driver = IndexGuideDriver::new(client, None);
        let other = EventMessage::new("context.read", json!({}));
        assert!(driver.handle(&other).await.unwrap().is_empty());
    }
}
