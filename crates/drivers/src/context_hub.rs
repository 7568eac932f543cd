//! Context-hub connector driver.
//!
//! Externalizes `context.*` events (initialize, read, write, search,
//! list) to an HTTP context-hub service exposing a simple document tree.
//! Each operation emits a `<type>.response` event carrying the hub's
//! JSON body; transport failures surface as driver failures and land in
//! the dead-letter queue.

use serde_json::{json, Value};

use vx_domain::error::{Error, Result};
use vx_domain::event::EventMessage;
use vx_registry::{Driver, DriverKind, DriverManifest};

pub struct ContextHubDriver {
    manifest: DriverManifest,
    base_url: String,
    client: reqwest::Client,
}

impl ContextHubDriver {
    pub fn new(base_url: &str) -> Result<Self> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "context hub URL must be http(s): {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            manifest: DriverManifest::new("context_hub", "Context Hub", DriverKind::Connector)
                .with_capability("context")
                .with_description("Document-tree operations against the context hub service"),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Map an event type to (method, path).  The hub's surface is a
    /// document tree: folders and documents addressed by path.
    fn route(&self, event_type: &str) -> Option<(reqwest::Method, String)> {
        let op = event_type.strip_prefix("context.")?;
        let route = match op {
            "initialize" => (reqwest::Method::POST, "/init".to_string()),
            "read" => (reqwest::Method::GET, "/docs".to_string()),
            "write" => (reqwest::Method::PUT, "/docs".to_string()),
            "search" => (reqwest::Method::POST, "/search".to_string()),
            "list" => (reqwest::Method::GET, "/list".to_string()),
            _ => return None,
        };
        Some(route)
    }

    async fn call_hub(
        &self,
        method: reqwest::Method,
        path: &str,
        user_id: &str,
        payload: &Value,
    ) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("X-User-ID", user_id);
        request = if method == reqwest::Method::GET {
            // GET carries the payload as query parameters.
            let query: Vec<(String, String)> = payload
                .as_object()
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| {
                            v.as_str()
                                .map(|s| (k.clone(), s.to_owned()))
                                .or_else(|| Some((k.clone(), v.to_string())))
                        })
                        .collect()
                })
                .unwrap_or_default();
            request.query(&query)
        } else {
            request.json(payload)
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("context hub: {e}"))
            } else {
                Error::Http(format!("context hub: {e}"))
            }
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Http(format!(
                "context hub HTTP {} - {text}",
                status.as_u16()
            )));
        }
        if text.is_empty() {
            Ok(json!({}))
        } else {
            Ok(serde_json::from_str(&text)?)
        }
    }
}

#[async_trait::async_trait]
impl Driver for ContextHubDriver {
    fn manifest(&self) -> &DriverManifest {
        &self.manifest
    }

    async fn handle(&self, event: &EventMessage) -> Result<Vec<EventMessage>> {
        // Skip our own response events coming back through the bus.
        if event.event_type.ends_with(".response") {
            return Ok(Vec::new());
        }
        let Some((method, path)) = self.route(&event.event_type) else {
            tracing::debug!(event_type = %event.event_type, "unsupported context operation");
            return Ok(Vec::new());
        };

        let payload = Value::Object(event.data.clone());
        let body = self
            .call_hub(method, &path, event.effective_user_id(), &payload)
            .await?;

        let mut response = EventMessage::new(
            format!("{}.response", event.event_type),
            json!({"result": body}),
        )
        .with_source(self.manifest.id.clone());
        response.user_id = event.user_id.clone();
        for key in ["request_id", "correlation_id", "session_id"] {
            if let Some(value) = event.metadata.get(key) {
                response.metadata.insert(key.into(), value.clone());
            }
        }
        Ok(vec![response])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_urls() {
        assert!(ContextHubDriver::new("ftp://hub").is_err());
        assert!(ContextHubDriver::new("http://localhost:3000").is_ok());
    }

    #[test]
    fn routes_known_operations() {
        let driver = ContextHubDriver::new("http://localhost:3000").unwrap();
        let (method, path) = driver.route("context.read").unwrap();
        assert_eq!(method, reqwest::Method::GET);
        assert_eq!(path, "/docs");

        let (method, _) = driver.route("context.write").unwrap();
        assert_eq!(method, reqwest::Method::PUT);

        assert!(driver.route("context.unknown").is_none());
        assert!(driver.route("other.read").is_none());
    }

    #[tokio::test]
    async fn response_events_are_ignored() {
        let driver = ContextHubDriver::new("http://localhost:3000").unwrap();
        let event = EventMessage::new("context.read.response", json!({}));
        assert!(driver.handle(&event).await.unwrap().is_empty());
    }
}
