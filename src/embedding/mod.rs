//! Concrete embedding providers.
//!
//! Implements [`EmbeddingProvider`] for each configured backend:
//! - **[`DisabledProvider`]**: always fails with [`EmbeddingError::Disabled`].
//! - **[`OpenAIProvider`]**: `POST {base}/v1/embeddings` with retry and backoff.
//! - **[`OllamaProvider`]**: `POST {base}/api/embed` on a local Ollama.
//! - **`LocalProvider`**: in-process inference via fastembed, behind the
//!   `local-embeddings` feature.
//!
//! # Retry Strategy
//!
//! The HTTP providers retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;

use policy_index_core::embedding::EmbeddingProvider;
use policy_index_core::EmbeddingError;

use crate::config::{ConfigError, EmbeddingConfig};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`. Indexing still stores
/// documents, with a null embedding.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

// ============ Shared HTTP retry loop ============

/// POST `body` to `url`, retrying 429/5xx and network errors.
///
/// Returns the parsed JSON body of the first successful response.
async fn post_with_retry(
    client: &reqwest::Client,
    label: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value, EmbeddingError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(
                provider = label,
                attempt,
                delay_secs = delay.as_secs(),
                error = last_err.as_deref().unwrap_or(""),
                "retrying embedding request"
            );
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(key) = bearer {
            req = req.bearer_auth(key);
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        EmbeddingError::Provider(format!("{} returned invalid JSON: {}", label, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let msg = format!("{} API error {}: {}", label, status, body_text);

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(msg);
                    continue;
                }

                return Err(EmbeddingError::Provider(msg));
            }
            Err(e) => {
                last_err = Some(format!("{} connection error ({}): {}", label, url, e));
                continue;
            }
        }
    }

    Err(EmbeddingError::Provider(last_err.unwrap_or_else(|| {
        format!("{} embedding failed after retries", label)
    })))
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {}", e)))
}

fn required_model(config: &EmbeddingConfig) -> Result<String, ConfigError> {
    config.model.clone().ok_or_else(|| {
        ConfigError::Invalid(format!(
            "embedding.model required for {} provider",
            config.provider
        ))
    })
}

fn required_dims(config: &EmbeddingConfig) -> Result<usize, ConfigError> {
    match config.dims {
        Some(d) if d > 0 => Ok(d),
        _ => Err(ConfigError::Invalid(format!(
            "embedding.dims required for {} provider",
            config.provider
        ))),
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI embeddings API, or any compatible
/// endpoint set via `embedding.url`.
///
/// The API key is read once, at construction, from the environment
/// variable named by `embedding.api_key_env`.
pub struct OpenAIProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ConfigError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingCredential(config.api_key_env.clone()))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> Result<Self, ConfigError> {
        let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
        Ok(Self {
            client: http_client(config)?,
            endpoint: format!("{}/v1/embeddings", base.trim_end_matches('/')),
            api_key,
            model: required_model(config)?,
            dims: required_dims(config)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.client,
            "OpenAI",
            &self.endpoint,
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;
        parse_openai_response(&json)
    }
}

fn json_to_vec(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            EmbeddingError::Provider("invalid OpenAI response: missing data array".into())
        })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let vec = item.get("embedding").and_then(json_to_vec).ok_or_else(|| {
            EmbeddingError::Provider("invalid OpenAI response: malformed embedding".into())
        })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on `embedding.url` (default `http://localhost:11434`).
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ConfigError> {
        let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
        Ok(Self {
            client: http_client(config)?,
            endpoint: format!("{}/api/embed", base.trim_end_matches('/')),
            model: required_model(config)?,
            dims: required_dims(config)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.client,
            "Ollama",
            &self.endpoint,
            None,
            &body,
            self.max_retries,
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbeddingError::Provider("invalid Ollama response: missing embeddings array".into())
        })?;

    embeddings
        .iter()
        .map(|e| {
            json_to_vec(e).ok_or_else(|| {
                EmbeddingError::Provider("invalid Ollama response: malformed embedding".into())
            })
        })
        .collect()
}

// ============ Local Provider (fastembed) ============

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use std::sync::{Arc, Mutex};

    const DEFAULT_LOCAL_MODEL: &str = "multilingual-e5-small";

    /// In-process embeddings via fastembed. The model is downloaded from
    /// Hugging Face on first use and cached; later runs need no network.
    pub struct LocalProvider {
        model_name: String,
        dims: usize,
        model: fastembed::EmbeddingModel,
        engine: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalProvider {
        pub fn new(config: &EmbeddingConfig) -> Result<Self, ConfigError> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
            let (model, default_dims) = fastembed_model(&model_name)?;
            Ok(Self {
                dims: config.dims.unwrap_or(default_dims),
                model_name,
                model,
                engine: Arc::new(Mutex::new(None)),
            })
        }
    }

    fn fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize), ConfigError> {
        use fastembed::EmbeddingModel as M;
        match name {
            "all-minilm-l6-v2" => Ok((M::AllMiniLML6V2, 384)),
            "bge-small-en-v1.5" => Ok((M::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((M::BGEBaseENV15, 768)),
            "multilingual-e5-small" => Ok((M::MultilingualE5Small, 384)),
            "multilingual-e5-base" => Ok((M::MultilingualE5Base, 768)),
            "multilingual-e5-large" => Ok((M::MultilingualE5Large, 1024)),
            other => Err(ConfigError::Invalid(format!(
                "unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
                 multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
                other
            ))),
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LocalProvider {
        fn model_name(&self) -> &str {
            &self.model_name
        }
        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let engine = Arc::clone(&self.engine);
            let model = self.model.clone();
            let texts = texts.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut guard = engine
                    .lock()
                    .map_err(|_| EmbeddingError::Provider("local model lock poisoned".into()))?;
                if guard.is_none() {
                    let loaded = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(true),
                    )
                    .map_err(|e| {
                        EmbeddingError::Provider(format!(
                            "failed to initialize local embedding model: {}",
                            e
                        ))
                    })?;
                    *guard = Some(loaded);
                }
                let Some(engine) = guard.as_mut() else {
                    return Err(EmbeddingError::Provider("local model not loaded".into()));
                };
                engine
                    .embed(texts, None)
                    .map_err(|e| EmbeddingError::Provider(format!("local embedding failed: {}", e)))
            })
            .await
            .map_err(|e| EmbeddingError::Provider(format!("embedding task panicked: {}", e)))?
        }
    }
}

#[cfg(feature = "local-embeddings")]
pub use local::LocalProvider;

/// Create the [`EmbeddingProvider`] named by `embedding.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires `--features local-embeddings`) |
pub fn create_provider(
    config: &EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>, ConfigError> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(ConfigError::Invalid(
            "local embedding provider requires --features local-embeddings".into(),
        )),
        other => Err(ConfigError::Invalid(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}
