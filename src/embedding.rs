//! Embedding provider implementations.
//!
//! Concrete backends for the [`EmbeddingProvider`] trait defined in
//! `docqa-core`:
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API.
//! - **`LocalEmbedder`**: runs models in-process via fastembed
//!   (feature `local-embeddings-fastembed`); no network calls after model download.
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Batches larger than `embedding.batch_size` are split into several requests.
//! Every returned vector is checked against the configured dimensionality.

use anyhow::{bail, Result};
use async_trait::async_trait;
use docqa_core::embedding::{check_dims, EmbeddingProvider};
use docqa_core::error::RagError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;

/// Shared request settings for the HTTP providers.
#[derive(Debug, Clone)]
struct HttpSettings {
    client: reqwest::Client,
    base_url: String,
    batch_size: usize,
    max_retries: u32,
}

impl HttpSettings {
    fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }
}

/// POST a JSON body with retry/backoff and return the parsed JSON response.
///
/// `service` names the backend in error messages.
async fn post_json_with_retry(
    settings: &HttpSettings,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    service: &str,
) -> std::result::Result<serde_json::Value, String> {
    let mut last_err = None;

    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(attempt, delay_secs = delay.as_secs(), service, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut request = settings.client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| format!("invalid {} response body: {}", service, e));
                }

                let body_text = response.text().await.unwrap_or_default();

                // 429 or 5xx, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(%status, service, "transient embedding error");
                    last_err = Some(format!("{} API error {}: {}", service, status, body_text));
                    continue;
                }

                // other 4xx, give up
                return Err(format!("{} API error {}: {}", service, status, body_text));
            }
            Err(e) => {
                last_err = Some(format!(
                    "{} connection error (is it running at {}?): {}",
                    service, settings.base_url, e
                ));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} embedding failed after retries", service)))
}

/// Embed `texts` in sub-batches of `batch_size`, validating count and dims.
async fn embed_in_batches<F, Fut>(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    mut send: F,
) -> docqa_core::error::Result<Vec<Vec<f32>>>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: std::future::Future<Output = std::result::Result<Vec<Vec<f32>>, String>>,
{
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        let vectors = send(batch.to_vec())
            .await
            .map_err(|message| embedding_error(provider.model_name(), message))?;
        if vectors.len() != batch.len() {
            return Err(embedding_error(
                provider.model_name(),
                format!("expected {} embeddings, got {}", batch.len(), vectors.len()),
            ));
        }
        for vector in &vectors {
            check_dims(provider, vector)?;
        }
        out.extend(vectors);
    }
    Ok(out)
}

fn embedding_error(model: &str, message: impl Into<String>) -> RagError {
    RagError::Embedding {
        model: model.to_string(),
        message: message.into(),
    }
}

fn first_vector(model: &str, mut vectors: Vec<Vec<f32>>) -> docqa_core::error::Result<Vec<f32>> {
    if vectors.is_empty() {
        return Err(embedding_error(model, "empty embedding response"));
    }
    Ok(vectors.swap_remove(0))
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
/// Requires Ollama to be running with an embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    http: HttpSettings,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            http: HttpSettings::new(config)?,
        })
    }

    async fn request(&self, texts: Vec<String>) -> std::result::Result<Vec<Vec<f32>>, String> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/api/embed", self.http.base_url);
        let json = post_json_with_retry(&self.http, &url, None, &body, "Ollama").await?;
        parse_ollama_response(&json)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> docqa_core::error::Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        first_vector(&self.model, vectors)
    }

    async fn embed_batch(&self, texts: &[String]) -> docqa_core::error::Result<Vec<Vec<f32>>> {
        embed_in_batches(self, texts, self.http.batch_size, |batch| self.request(batch)).await
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, String> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| "Invalid Ollama response: missing embeddings array".to_string())?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| parse_floats(values))
                .ok_or_else(|| "Invalid Ollama response: embedding is not an array".to_string())
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls the `POST /v1/embeddings` endpoint with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    http: HttpSettings,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            api_key,
            http: HttpSettings::new(config)?,
        })
    }

    async fn request(&self, texts: Vec<String>) -> std::result::Result<Vec<Vec<f32>>, String> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/v1/embeddings", self.http.base_url);
        let json =
            post_json_with_retry(&self.http, &url, Some(&self.api_key), &body, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> docqa_core::error::Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        first_vector(&self.model, vectors)
    }

    async fn embed_batch(&self, texts: &[String]) -> docqa_core::error::Result<Vec<Vec<f32>>> {
        embed_in_batches(self, texts, self.http.batch_size, |batch| self.request(batch)).await
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays and orders them by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, String> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| "Invalid OpenAI response: missing data array".to_string())?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| "Invalid OpenAI response: missing embedding".to_string())?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, parse_floats(embedding)));
    }

    // Sort by index to ensure order matches input
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_floats(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for in-process inference via fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached;
/// afterwards embeddings run entirely offline.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    kind: fastembed::EmbeddingModel,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let kind = config_to_fastembed_model(&config.model)?;
        Ok(Self {
            model_name: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            kind,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> docqa_core::error::Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        first_vector(&self.model_name, vectors)
    }

    async fn embed_batch(&self, texts: &[String]) -> docqa_core::error::Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let kind = self.kind.clone();
        let batch_size = self.batch_size;
        let owned = texts.to_vec();

        let result = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| "local embedding model lock poisoned".to_string())?;
            if guard.is_none() {
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(kind).with_show_download_progress(false),
                )
                .map_err(|e| format!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(loaded);
            }
            match guard.as_mut() {
                Some(embedder) => embedder
                    .embed(owned, Some(batch_size))
                    .map_err(|e| format!("Local embedding failed: {}", e)),
                None => Err("local embedding model unavailable".to_string()),
            }
        })
        .await
        .map_err(|e| embedding_error(&self.model_name, e.to_string()))?;

        let vectors = result.map_err(|message| embedding_error(&self.model_name, message))?;
        for vector in &vectors {
            check_dims(self, vector)?;
        }
        Ok(vectors)
    }
}

/// Create the configured [`EmbeddingProvider`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({
            "model": "nomic-embed-text",
            "embeddings": [[0.1, 0.2], [0.3, 0.4]]
        });
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![0.1f32, 0.2], vec![0.3f32, 0.4]]);
    }

    #[test]
    fn test_parse_ollama_response_missing_field() {
        let json = serde_json::json!({ "error": "model not found" });
        assert!(parse_ollama_response(&json).is_err());
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [2.0, 2.0] },
                { "index": 0, "embedding": [1.0, 1.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0f32, 1.0], vec![2.0f32, 2.0]]);
    }

    #[test]
    fn test_create_embedder_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "nope".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }

    #[test]
    fn test_create_ollama_embedder_uses_config() {
        let config = EmbeddingConfig::default();
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_name(), "nomic-embed-text");
        assert_eq!(embedder.dims(), 768);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_embedding_error() {
        let config = EmbeddingConfig {
            url: Some("http://127.0.0.1:9".into()),
            max_retries: 0,
            timeout_secs: 2,
            ..EmbeddingConfig::default()
        };
        let embedder = OllamaEmbedder::new(&config).unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, RagError::Embedding { .. }));
    }
}
