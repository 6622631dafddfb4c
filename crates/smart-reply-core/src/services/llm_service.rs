use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{EndpointConfig, LlmConfig};
use crate::models::chat::ChatMessage;
use crate::models::MediaPayload;
use crate::utils::error::CoreError;
use crate::utils::failover::FailoverChain;
use crate::utils::json::extract_first_json_object;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

const ENVELOPE_INSTRUCTION: &str = r#"Respond ONLY with a JSON object of the form:
{"reply": "<message to send to the customer>", "sentiment": "positive|neutral|negative", "product_intent": "<product the customer asks about, or null>"}"#;

/// Everything the reply model needs for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub history: Vec<ChatMessage>,
    pub multimodal_context: Option<String>,
    pub style_context: Option<String>,
    /// Owner context was injected; the reply continues the owner's thread.
    pub collaborative: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedReply {
    pub text: String,
    pub sentiment: Option<String>,
    pub product_intent: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReplyProvider: Send + Sync {
    async fn generate_reply(&self, request: &ReplyRequest) -> Result<GeneratedReply, CoreError>;
}

/// Short natural-language description of a media attachment.
#[async_trait]
pub trait MediaDescriber: Send + Sync {
    async fn describe(&self, media: &MediaPayload, caption: Option<&str>)
        -> Result<String, CoreError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<Value>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ReplyEnvelope {
    reply: String,
    #[serde(default)]
    sentiment: Option<String>,
    #[serde(default, alias = "productIntent")]
    product_intent: Option<String>,
}

/// OpenAI-compatible `/v1/chat/completions` client (hosted gateway or a
/// local llama.cpp server).
#[derive(Clone)]
struct CompletionClient {
    client: Client,
    name: String,
    url: String,
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: usize,
    temperature: f32,
}

impl CompletionClient {
    fn new(endpoint: &EndpointConfig, config: &LlmConfig) -> Self {
        let path = endpoint.path.as_deref().unwrap_or(CHAT_COMPLETIONS_PATH);
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            name: endpoint.name.clone(),
            url: format!("{}{}", endpoint.base_url.trim_end_matches('/'), path),
            api_key: endpoint.api_key.clone(),
            model: endpoint.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    async fn complete(&self, messages: Vec<Value>) -> Result<String> {
        debug!(provider = %self.name, "Calling chat completion with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: self.model.as_deref(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to call LLM API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error: {} - {}", status, body);
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .context("No content returned from LLM")
    }
}

#[derive(Clone)]
pub struct HttpReplyProvider {
    inner: CompletionClient,
}

impl HttpReplyProvider {
    pub fn new(endpoint: &EndpointConfig, config: &LlmConfig) -> Self {
        Self {
            inner: CompletionClient::new(endpoint, config),
        }
    }
}

#[async_trait]
impl ReplyProvider for HttpReplyProvider {
    async fn generate_reply(&self, request: &ReplyRequest) -> Result<GeneratedReply, CoreError> {
        let messages = build_messages(request)
            .into_iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();

        let raw = self
            .inner
            .complete(messages)
            .await
            .map_err(|e| CoreError::Reply(format!("{}: {}", self.inner.name, e)))?;

        parse_reply(&raw)
    }
}

#[async_trait]
impl ReplyProvider for FailoverChain<dyn ReplyProvider> {
    async fn generate_reply(&self, request: &ReplyRequest) -> Result<GeneratedReply, CoreError> {
        self.first_success(|provider| async move { provider.generate_reply(request).await })
            .await
    }
}

pub fn build_reply_chain(config: &LlmConfig) -> FailoverChain<dyn ReplyProvider> {
    let members: Vec<Arc<dyn ReplyProvider>> = config
        .providers
        .iter()
        .map(|endpoint| Arc::new(HttpReplyProvider::new(endpoint, config)) as Arc<dyn ReplyProvider>)
        .collect();

    FailoverChain::new("reply", members)
}

/// Vision-capable completion endpoint used to caption inbound media.
#[derive(Clone)]
pub struct HttpMediaDescriber {
    inner: CompletionClient,
}

impl HttpMediaDescriber {
    pub fn new(endpoint: &EndpointConfig, config: &LlmConfig) -> Self {
        Self {
            inner: CompletionClient::new(endpoint, config),
        }
    }
}

#[async_trait]
impl MediaDescriber for HttpMediaDescriber {
    async fn describe(
        &self,
        media: &MediaPayload,
        caption: Option<&str>,
    ) -> Result<String, CoreError> {
        if !media.mime_type.starts_with("image/") {
            return Err(CoreError::Reply(format!(
                "Unsupported media type for description: {}",
                media.mime_type
            )));
        }

        let mut prompt = String::from(
            "Describe this image in one or two short sentences for a shop assistant. \
             Mention products, colors, text and prices if visible.",
        );
        if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
            prompt.push_str(&format!("\nThe customer wrote: {}", caption));
        }

        let messages = vec![json!({
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:{};base64,{}", media.mime_type, media.data) }
                }
            ]
        })];

        self.inner
            .complete(messages)
            .await
            .map(|text| text.trim().to_string())
            .map_err(|e| CoreError::Reply(format!("{}: {}", self.inner.name, e)))
    }
}

/// System prompt (with style + output envelope), history, then the query.
pub fn build_messages(request: &ReplyRequest) -> Vec<ChatMessage> {
    let mut system = request.system_prompt.clone();
    if let Some(style) = request.style_context.as_deref().filter(|s| !s.trim().is_empty()) {
        system.push_str("\n\nWriting style to imitate:\n");
        system.push_str(style);
    }
    system.push_str("\n\n");
    system.push_str(ENVELOPE_INSTRUCTION);

    let mut user = request.user_message.clone();
    if let Some(context) = request.multimodal_context.as_deref() {
        user.push_str("\n\n[Attached media: ");
        user.push_str(context);
        user.push(']');
    }

    let mut messages = Vec::with_capacity(request.history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend(request.history.iter().cloned());
    messages.push(ChatMessage::user(user));
    messages
}

/// JSON envelope when the model followed instructions, plain text otherwise.
pub fn parse_reply(raw: &str) -> Result<GeneratedReply, CoreError> {
    if let Some(object) = extract_first_json_object(raw) {
        match serde_json::from_str::<ReplyEnvelope>(object) {
            Ok(envelope) if !envelope.reply.trim().is_empty() => {
                return Ok(GeneratedReply {
                    text: envelope.reply.trim().to_string(),
                    sentiment: envelope.sentiment,
                    product_intent: envelope.product_intent,
                });
            }
            Ok(_) => {}
            Err(e) => warn!("Reply envelope unreadable, using raw text: {}", e),
        }
    }

    let text = raw.trim();
    if text.is_empty() {
        return Err(CoreError::Reply("Empty reply from model".to_string()));
    }

    Ok(GeneratedReply {
        text: text.to_string(),
        sentiment: None,
        product_intent: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ReplyRequest {
        ReplyRequest {
            system_prompt: "You are a shop assistant.".into(),
            user_message: "ada stok?\nukuran M".into(),
            history: vec![ChatMessage::user("halo"), ChatMessage::assistant("halo kak")],
            multimodal_context: Some("photo of black sneakers".into()),
            style_context: Some("santai, pakai 'kak'".into()),
            collaborative: false,
        }
    }

    #[test]
    fn test_build_messages_layout() {
        let messages = build_messages(&request());
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("santai"));
        assert!(messages[0].content.contains("\"reply\""));
        assert_eq!(messages[1].content, "halo");
        assert_eq!(messages[3].role, "user");
        assert!(messages[3]
            .content
            .ends_with("[Attached media: photo of black sneakers]"));
    }

    #[test]
    fn test_parse_envelope() {
        let raw = "```json\n{\"reply\": \"Ada kak\", \"sentiment\": \"positive\", \"productIntent\": \"sneakers\"}\n```";
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.text, "Ada kak");
        assert_eq!(reply.sentiment.as_deref(), Some("positive"));
        assert_eq!(reply.product_intent.as_deref(), Some("sneakers"));
    }

    #[test]
    fn test_parse_plain_text_fallback() {
        let reply = parse_reply("  Ada kak, mau warna apa?  ").unwrap();
        assert_eq!(reply.text, "Ada kak, mau warna apa?");
        assert!(reply.sentiment.is_none());
    }

    #[test]
    fn test_parse_empty_envelope_falls_back_to_raw() {
        let reply = parse_reply(r#"{"reply": ""}"#).unwrap();
        assert_eq!(reply.text, r#"{"reply": ""}"#);
    }

    #[test]
    fn test_parse_blank_is_error() {
        assert!(parse_reply("   ").is_err());
    }

    #[tokio::test]
    async fn test_chain_uses_local_when_hosted_fails() {
        let mut hosted = MockReplyProvider::new();
        hosted
            .expect_generate_reply()
            .times(1)
            .returning(|_| Err(CoreError::Reply("gateway 502".into())));
        let mut local = MockReplyProvider::new();
        local.expect_generate_reply().times(1).returning(|_| {
            Ok(GeneratedReply {
                text: "dari lokal".into(),
                sentiment: None,
                product_intent: None,
            })
        });

        let chain: FailoverChain<dyn ReplyProvider> = FailoverChain::new(
            "reply",
            vec![Arc::new(hosted) as Arc<dyn ReplyProvider>, Arc::new(local)],
        );
        let reply = chain.generate_reply(&request()).await.unwrap();
        assert_eq!(reply.text, "dari lokal");
    }
}
