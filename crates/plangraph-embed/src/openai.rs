//! OpenAI-compatible embeddings over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use tracing::debug;

use crate::embedder::Embedder;
use crate::error::{EmbedError, Result};

/// Configuration for OpenAI embeddings.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Requested output dimensions. Defaults by model when unset.
    pub dimensions: Option<usize>,
    /// Reported vector-space version. Bump when the model changes meaning.
    pub model_version: u32,
    pub timeout: Duration,
}

impl OpenAiEmbedderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
            model_version: 1,
            timeout: Duration::from_secs(60),
        }
    }

    /// Create config from the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            EmbedError::Config("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_model_version(mut self, version: u32) -> Self {
        self.model_version = version.max(1);
        self
    }
}

/// OpenAI embeddings API client.
///
/// The HTTP client is built on first use (or by `initialize`) and dropped by
/// `dispose`.
pub struct OpenAiEmbedder {
    client: Mutex<Option<Client>>,
    config: OpenAiEmbedderConfig,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiEmbedderConfig) -> Self {
        let dimensions = config
            .dimensions
            .unwrap_or(match config.model.as_str() {
                "text-embedding-3-large" => 3072,
                _ => 1536,
            });

        Self {
            client: Mutex::new(None),
            config,
            dimensions,
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(OpenAiEmbedderConfig::from_env()?))
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.config.base_url.trim_end_matches('/'))
    }

    /// Shared client, creating it if needed. `Client` clones are cheap handles.
    fn client(&self) -> Result<Client> {
        let mut slot = self.client.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| EmbedError::Config(format!("Failed to create HTTP client: {}", e)))?;
        debug!(model = %self.config.model, "Created embeddings HTTP client");
        *slot = Some(client.clone());
        Ok(client)
    }

    pub fn is_initialized(&self) -> bool {
        self.client.lock().is_some()
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn initialize(&self) -> Result<()> {
        self.client().map(|_| ())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Backend("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: self.config.model.clone(),
            input: texts.iter().map(|s| s.to_string()).collect(),
            dimensions: self.config.dimensions,
        };

        let response = self
            .client()?
            .post(self.embeddings_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Backend(format!(
                "Embedding request failed: HTTP {} - {}",
                status, body
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Serialization(format!("Failed to parse response: {}", e)))?;

        into_ordered_vectors(result, texts.len(), self.config.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_version(&self) -> u32 {
        self.config.model_version
    }

    fn name(&self) -> &str {
        "openai"
    }

    async fn dispose(&self) {
        self.client.lock().take();
    }
}

/// Re-order response items by index and check the count, and the vector
/// lengths when dimensions were requested.
fn into_ordered_vectors(
    response: EmbeddingResponse,
    expected: usize,
    dimensions: Option<usize>,
) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            actual: response.data.len(),
        });
    }
    if let Some(dims) = dimensions
        && let Some(bad) = response.data.iter().find(|e| e.embedding.len() != dims)
    {
        return Err(EmbedError::DimensionMismatch {
            expected: dims,
            actual: bad.embedding.len(),
        });
    }
    let mut embeddings = response.data;
    embeddings.sort_by_key(|e| e.index);
    Ok(embeddings.into_iter().map(|e| e.embedding).collect())
}

#[derive(Debug, serde::Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = OpenAiEmbedderConfig::new("key")
            .with_base_url("http://custom.api/")
            .with_model("text-embedding-3-large")
            .with_model_version(0);

        assert_eq!(config.base_url, "http://custom.api/");
        assert_eq!(config.model, "text-embedding-3-large");
        assert_eq!(config.model_version, 1);

        let embedder = OpenAiEmbedder::new(config);
        assert_eq!(embedder.dimensions(), 3072);
        assert_eq!(embedder.embeddings_url(), "http://custom.api/embeddings");
    }

    #[test]
    fn test_explicit_dimensions() {
        let embedder = OpenAiEmbedder::new(OpenAiEmbedderConfig::new("key").with_dimensions(256));
        assert_eq!(embedder.dimensions(), 256);
        assert_eq!(embedder.name(), "openai");
    }

    #[tokio::test]
    async fn test_client_is_lazy() {
        let embedder = OpenAiEmbedder::new(OpenAiEmbedderConfig::new("key"));
        assert!(!embedder.is_initialized());

        embedder.initialize().await.unwrap();
        assert!(embedder.is_initialized());

        embedder.dispose().await;
        assert!(!embedder.is_initialized());
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let embedder = OpenAiEmbedder::new(OpenAiEmbedderConfig::new("key"));
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
        assert!(!embedder.is_initialized());
    }

    #[test]
    fn test_response_reordered_by_index() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]}"#,
        )
        .unwrap();
        let vectors = into_ordered_vectors(response, 2, None).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_response_count_mismatch() {
        let response: EmbeddingResponse =
            serde_json::from_str(r#"{"data": [{"index": 0, "embedding": [1.0]}]}"#).unwrap();
        assert!(matches!(
            into_ordered_vectors(response, 2, None),
            Err(EmbedError::CountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_response_dimension_mismatch() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data": [{"index": 0, "embedding": [1.0, 0.0]}, {"index": 1, "embedding": [1.0]}]}"#,
        )
        .unwrap();
        assert!(matches!(
            into_ordered_vectors(response, 2, Some(2)),
            Err(EmbedError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }
}
