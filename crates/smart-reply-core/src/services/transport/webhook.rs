use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::normalize::message_from_record;
use super::ChatTransport;
use crate::config::TransportConfig;
use crate::models::{InboundMessage, MediaPayload};
use crate::utils::error::CoreError;

/// `ChatTransport` over an Evolution-API style HTTP gateway. Inbound events
/// arrive separately on the webhook route.
#[derive(Clone)]
pub struct WebhookTransport {
    client: Client,
    base_url: String,
    instance: String,
    api_key: Option<String>,
}

impl WebhookTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            instance: config.instance_name.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}/{}", self.base_url, route, self.instance)
    }

    async fn post(&self, route: &str, body: Value) -> Result<Value> {
        let mut builder = self.client.post(self.url(route)).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to reach chat gateway ({})", route))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gateway {} error ({}): {}", route, status, text);
        }

        let text = response.text().await.context("Failed to read gateway response")?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).context("Gateway response is not JSON")
    }
}

fn history_records(value: &Value) -> Vec<&Value> {
    if let Some(items) = value.as_array() {
        return items.iter().collect();
    }
    value["messages"]["records"]
        .as_array()
        .or_else(|| value["messages"].as_array())
        .or_else(|| value["records"].as_array())
        .map(|items| items.iter().collect())
        .unwrap_or_default()
}

#[async_trait]
impl ChatTransport for WebhookTransport {
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), CoreError> {
        self.post(
            "message/sendText",
            json!({ "number": conversation_id, "text": text }),
        )
        .await
        .map_err(|e| CoreError::Transport(e.to_string()))?;

        info!(conversation_id, "Reply sent ({} chars)", text.len());
        Ok(())
    }

    async fn fetch_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, CoreError> {
        let value = self
            .post(
                "chat/findMessages",
                json!({ "where": { "key": { "remoteJid": conversation_id } }, "limit": limit }),
            )
            .await
            .map_err(|e| CoreError::Transport(e.to_string()))?;

        let mut messages: Vec<InboundMessage> = history_records(&value)
            .into_iter()
            .filter_map(message_from_record)
            .filter(|m| !m.body.trim().is_empty())
            .collect();

        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let skip = messages.len().saturating_sub(limit);
        debug!(conversation_id, "Fetched {} history messages", messages.len() - skip);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn download_media(
        &self,
        _conversation_id: &str,
        message_id: &str,
    ) -> Result<MediaPayload, CoreError> {
        let value = self
            .post(
                "chat/getBase64FromMediaMessage",
                json!({ "message": { "key": { "id": message_id } } }),
            )
            .await
            .map_err(|e| CoreError::Transport(e.to_string()))?;

        let data = value["base64"]
            .as_str()
            .ok_or_else(|| CoreError::Transport("Gateway returned no media data".to_string()))?;
        let mime_type = value["mimetype"]
            .as_str()
            .or_else(|| value["mimeType"].as_str())
            .unwrap_or("application/octet-stream");

        Ok(MediaPayload {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }
}
