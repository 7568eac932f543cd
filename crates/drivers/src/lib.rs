//! `vx-drivers` — the reference drivers.
//!
//! Four drivers implement the contracts the runtime ships with: the chat
//! agent (`llm.chat`), the job scheduler (`plan.schedule` with cron and
//! interval jobs), the context-hub connector (`context.*` over HTTP),
//! and the index-guide generator (`folder.created`).  Each is an
//! ordinary [`vx_registry::Driver`]; `install_default_drivers` registers
//! whichever ones the environment can support and skips the rest.

pub mod chat;
pub mod completion;
pub mod context_hub;
pub mod index_guide;
pub mod scheduler;

use std::sync::Arc;

use vx_bus::EventBus;
use vx_domain::error::Result;
use vx_registry::{DriverRegistry, ModelRegistry};
use vx_storage::StorageProvider;

use crate::chat::ChatAgentDriver;
use crate::completion::{CompletionClient, OpenAiCompatClient};
use crate::context_hub::ContextHubDriver;
use crate::index_guide::IndexGuideDriver;
use crate::scheduler::SchedulerDriver;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use completion::{CompletionRequest, CompletionResponse, TokenUsage};

/// Options for [`install_default_drivers`].
#[derive(Default)]
pub struct InstallOptions {
    /// Completion client for the chat and index-guide drivers.  When
    /// unset, one is built from `OPENAI_API_KEY` / `OPENAI_BASE_URL`;
    /// without a key those drivers are skipped.
    pub completion: Option<Arc<dyn CompletionClient>>,
    /// Base URL of the context-hub service.  Falls back to
    /// `CONTEXT_HUB_URL`; without one the context driver is skipped.
    pub context_hub_url: Option<String>,
    /// Default chat model id.
    pub chat_model: Option<String>,
}

/// Register the reference drivers that the current environment supports.
///
/// Drivers that cannot be constructed (no API key, no hub URL) are
/// logged and skipped rather than failing startup.  Returns the ids of
/// the drivers that were registered.
pub async fn install_default_drivers(
    drivers: &DriverRegistry,
    models: Arc<ModelRegistry>,
    storage: Arc<dyn StorageProvider>,
    bus: Arc<dyn EventBus>,
    options: InstallOptions,
) -> Result<Vec<String>> {
    let mut installed = Vec::new();

    let completion = options.completion.or_else(|| {
        match OpenAiCompatClient::from_env() {
            Ok(client) => Some(Arc::new(client) as Arc<dyn CompletionClient>),
            Err(e) => {
                tracing::warn!(error = %e, "no completion client available, skipping LLM drivers");
                None
            }
        }
    });

    if let Some(completion) = &completion {
        let chat = ChatAgentDriver::new(
            completion.clone(),
            models.clone(),
            options.chat_model.clone(),
        );
        drivers.register(Arc::new(chat))?;
        installed.push("chat_agent".to_string());

        let guide = IndexGuideDriver::new(completion.clone(), options.chat_model);
        drivers.register(Arc::new(guide))?;
        installed.push("index_guide_generator".to_string());
    }

    let scheduler = SchedulerDriver::new(storage, bus);
    drivers.register(Arc::new(scheduler))?;
    installed.push("scheduler".to_string());

    let hub_url = options
        .context_hub_url
        .or_else(|| std::env::var("CONTEXT_HUB_URL").ok().filter(|u| !u.is_empty()));
    match hub_url {
        Some(url) => {
            let hub = ContextHubDriver::new(&url)?;
            drivers.register(Arc::new(hub))?;
            installed.push("context_hub".to_string());
        }
        None => {
            tracing::info!("no context hub configured, skipping context driver");
        }
    }

    drivers.initialize_all().await?;
    tracing::info!(drivers = ?installed, "default drivers installed");
    Ok(installed)
}

#[cfg(test)]
mod e2e_tests {
    use std::time::Duration;

    use serde_json::json;

    use vx_domain::config::RuntimeConfig;
    use vx_domain::event::EventMessage;
    use vx_runtime::VextirRuntime;

    use super::*;
    use crate::completion::testing::ScriptedClient;

    #[tokio::test]
    async fn chat_round_trip_through_the_runtime() {
        let runtime = VextirRuntime::initialize(RuntimeConfig::default())
            .await
            .unwrap();

        let chat = ChatAgentDriver::new(
            Arc::new(ScriptedClient::new(vec!["Hi! How can I help?"])),
            runtime.models().clone(),
            None,
        );
        runtime.register_driver(Arc::new(chat)).await.unwrap();

        let event = EventMessage::new(
            "llm.chat",
            json!({
                "messages": [{"role": "user", "content": "Hello"}],
                "model": "gpt-3.5-turbo"
            }),
        )
        .with_user_id("cli_user")
        .with_session_id("s1")
        .with_request_id("r1");

        let response = runtime
            .send_and_wait(event, Duration::from_secs(5))
            .await
            .unwrap()
            .expect("chat response within timeout");

        assert_eq!(response.event_type, "llm.chat.response");
        assert_eq!(response.request_id(), Some("r1"));
        assert_eq!(response.turn_number(), Some(1));
        assert_eq!(
            response.data.get("response"),
            Some(&json!("Hi! How can I help?"))
        );

        // The processor attaches the assistant reply on its own
        // subscription; give it a beat before inspecting the session.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let history = runtime.conversations().history("s1", None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "Hello");
        assert_eq!(history[1].content, "Hi! How can I help?");

        // Usage landed in the ledger for the calling user.
        let stats = runtime.models().get_usage_stats(Some("cli_user"));
        assert_eq!(stats.total_requests, 1);

        // The chat event found a driver, so nothing is left orphaned.
        let orphaned = runtime.event_bus().get_orphaned_events(None).await.unwrap();
        assert!(
            orphaned.iter().all(|r| r.event.event_type != "llm.chat"),
            "consumed chat event must not stay orphaned"
        );

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn install_skips_unavailable_drivers() {
        let runtime = VextirRuntime::initialize(RuntimeConfig::default())
            .await
            .unwrap();

        let installed = install_default_drivers(
            runtime.drivers(),
            runtime.models().clone(),
            runtime.storage().clone(),
            runtime.event_bus().clone(),
            InstallOptions {
                completion: Some(Arc::new(ScriptedClient::new(vec![]))),
                context_hub_url: None,
                chat_model: None,
            },
        )
        .await
        .unwrap();

        assert!(installed.contains(&"chat_agent".to_string()));
        assert!(installed.contains(&"scheduler".to_string()));
        assert!(installed.contains(&"index_guide_generator".to_string()));
        assert!(!installed.contains(&"context_hub".to_string()));

        runtime.shutdown().await.unwrap();
    }
}
