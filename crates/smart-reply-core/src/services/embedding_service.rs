use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{EmbeddingConfig, EndpointConfig};
use crate::utils::error::CoreError;
use crate::utils::failover::FailoverChain;

/// Text -> vector capability. An empty vector means "nothing to embed".
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    content: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

/// Embedding endpoint speaking either the llama.cpp `/embedding` shape or the
/// OpenAI `/v1/embeddings` shape.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: Client,
    name: String,
    url: String,
    api_key: Option<String>,
    model: Option<String>,
    dimension: Option<usize>,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: &EndpointConfig, dimension: Option<usize>, timeout: Duration) -> Self {
        let path = endpoint.path.as_deref().unwrap_or("/embedding");
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            name: endpoint.name.clone(),
            url: format!("{}{}", endpoint.base_url.trim_end_matches('/'), path),
            api_key: endpoint.api_key.clone(),
            model: endpoint.model.clone(),
            dimension,
        }
    }

    async fn embed_internal(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = %self.name, "Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            content: text,
            input: text,
            model: self.model.as_deref(),
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let json_value: Value = response
            .json()
            .await
            .context("Failed to parse embedding response as JSON")?;

        let embedding = parse_embedding(&json_value)?;

        if let Some(expected) = self.dimension {
            if !embedding.is_empty() && embedding.len() != expected {
                anyhow::bail!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    expected,
                    embedding.len()
                );
            }
        }

        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        self.embed_internal(text)
            .await
            .map_err(|e| CoreError::Embedding(format!("{}: {}", self.name, e)))
    }
}

/// Tries each configured endpoint in order.
#[async_trait]
impl EmbeddingProvider for FailoverChain<dyn EmbeddingProvider> {
    fn name(&self) -> &str {
        self.capability()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        self.first_success(|provider| async move { provider.embed(text).await })
            .await
    }
}

pub fn build_embedding_chain(config: &EmbeddingConfig) -> FailoverChain<dyn EmbeddingProvider> {
    let timeout = Duration::from_secs(config.timeout_seconds);
    let members: Vec<Arc<dyn EmbeddingProvider>> = config
        .providers
        .iter()
        .map(|endpoint| {
            Arc::new(HttpEmbeddingProvider::new(endpoint, config.dimension, timeout))
                as Arc<dyn EmbeddingProvider>
        })
        .collect();

    FailoverChain::new("embedding", members)
}

fn floats(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Accepts `{"embedding": [...]}`, `{"data": [{"embedding": [...]}]}`,
/// `[{"embedding": [...]}]` and a bare `[...]`.
pub fn parse_embedding(json_value: &Value) -> Result<Vec<f32>> {
    if let Some(arr) = json_value.as_array() {
        let Some(first) = arr.first() else {
            return Ok(Vec::new());
        };
        return match first.get("embedding") {
            Some(Value::Array(inner)) => match inner.first() {
                // llama.cpp pooled output: [{"embedding": [[...]]}]
                Some(Value::Array(nested)) => Ok(floats(nested)),
                _ => Ok(floats(inner)),
            },
            _ => Ok(floats(arr)),
        };
    }

    if let Some(Value::Array(inner)) = json_value.get("embedding") {
        return Ok(floats(inner));
    }

    if let Some(Value::Array(data)) = json_value.get("data") {
        return match data.first().and_then(|d| d.get("embedding")) {
            Some(Value::Array(inner)) => Ok(floats(inner)),
            _ if data.is_empty() => Ok(Vec::new()),
            _ => anyhow::bail!("Unrecognized embedding response format: {}", json_value),
        };
    }

    anyhow::bail!("Unrecognized embedding response format: {}", json_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_llama_cpp_shape() {
        let v = json!({"embedding": [0.1, 0.2, 0.3]});
        assert_eq!(parse_embedding(&v).unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_parse_openai_shape() {
        let v = json!({"data": [{"embedding": [1.0, 2.0], "index": 0}], "model": "x"});
        assert_eq!(parse_embedding(&v).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_parse_array_shapes() {
        assert_eq!(parse_embedding(&json!([0.5, 0.25])).unwrap(), vec![0.5, 0.25]);
        assert_eq!(
            parse_embedding(&json!([{"embedding": [[0.5, 0.25]]}])).unwrap(),
            vec![0.5, 0.25]
        );
    }

    #[test]
    fn test_parse_empty_is_skip_signal() {
        assert!(parse_embedding(&json!([])).unwrap().is_empty());
        assert!(parse_embedding(&json!({"data": []})).unwrap().is_empty());
    }

    #[test]
    fn test_parse_unknown_shape_errors() {
        assert!(parse_embedding(&json!({"error": "overloaded"})).is_err());
    }

    struct Fixed(Result<Vec<f32>, &'static str>);

    #[async_trait]
    impl EmbeddingProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CoreError> {
            self.0.clone().map_err(|e| CoreError::Embedding(e.to_string()))
        }
    }

    #[tokio::test]
    async fn test_chain_falls_back_to_local() {
        let chain: FailoverChain<dyn EmbeddingProvider> = FailoverChain::new(
            "embedding",
            vec![
                Arc::new(Fixed(Err("gateway timeout"))) as Arc<dyn EmbeddingProvider>,
                Arc::new(Fixed(Ok(vec![1.0]))),
            ],
        );
        assert_eq!(chain.embed("halo").await.unwrap(), vec![1.0]);
    }

    #[test]
    fn test_chain_built_in_config_order() {
        let endpoint = |name: &str| EndpointConfig {
            name: name.to_string(),
            base_url: "http://localhost:1/".to_string(),
            api_key: None,
            model: None,
            path: None,
        };
        let config = EmbeddingConfig {
            providers: vec![endpoint("hosted"), endpoint("local")],
            dimension: Some(768),
            timeout_seconds: 5,
        };
        let chain = build_embedding_chain(&config);
        assert_eq!(chain.len(), 2);
        assert_eq!(EmbeddingProvider::name(&chain), "embedding");
    }
}
