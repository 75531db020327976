//! Embedding backends and the batching/retry adapter in front of them.
//!
//! [`EmbeddingBackend`] is the seam to a provider. Concrete backends:
//! - **[`DisabledBackend`]**: always fails permanently; used when
//!   `embedding.provider = "disabled"`.
//! - **[`OpenAiBackend`]**: `POST {url}/v1/embeddings` (OpenAI or any
//!   compatible server).
//! - **[`OllamaBackend`]**: `POST {url}/api/embed` on a local Ollama.
//!
//! [`EmbeddingAdapter`] wraps a backend and adds the payload guard, batching,
//! bounded batch concurrency, result validation and retry.
//!
//! Also provides the vector utilities used by the store:
//! - [`cosine_similarity`]
//! - [`vec_to_blob`] / [`blob_to_vec`] for little-endian `f32` BLOBs
//!
//! # Retry Strategy
//!
//! Backends classify failures as [`ProviderError::Transient`] or
//! [`ProviderError::Permanent`]:
//! - timeouts, connection errors, HTTP 429 and 5xx → transient, retried
//! - other HTTP 4xx, malformed bodies, wrong vector count or dimension →
//!   permanent, returned immediately
//!
//! The delay before retry `n` is `min(max_delay, base_delay * 2^(n-1))`
//! with equal jitter: half of it fixed, half uniformly random.

mod http;

pub use http::{OllamaBackend, OpenAiBackend};

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use crate::chunk::count_tokens;
use crate::config::EmbeddingConfig;
use crate::error::{Result, VectorizeError};

/// Failure reported by a backend for one batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

/// A provider that turns a batch of texts into vectors.
///
/// Implementations return one vector per input, in input order. They do not
/// retry; the [`EmbeddingAdapter`] does.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Fixed dimensionality of every vector this backend returns.
    fn dims(&self) -> usize;
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;
}

// ============ Disabled Backend ============

/// Backend used when no provider is configured. Every call fails.
pub struct DisabledBackend;

#[async_trait]
impl EmbeddingBackend for DisabledBackend {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(
        &self,
        _texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Permanent(
            "embedding provider is disabled".to_string(),
        ))
    }
}

/// Create the backend named by `config.provider`.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledBackend`] |
/// | `"openai"` | [`OpenAiBackend`], key from `OPENAI_API_KEY` |
/// | `"ollama"` | [`OllamaBackend`] |
pub fn create_backend(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingBackend>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledBackend)),
        "openai" => {
            let (model, dims) = model_and_dims(config)?;
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            let url = config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string());
            Ok(Arc::new(OpenAiBackend::new(
                &url,
                Some(api_key),
                model,
                dims,
                timeout,
            )?))
        }
        "ollama" => {
            let (model, dims) = model_and_dims(config)?;
            let url = config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            Ok(Arc::new(OllamaBackend::new(&url, model, dims, timeout)?))
        }
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

fn model_and_dims(config: &EmbeddingConfig) -> anyhow::Result<(String, usize)> {
    let model = config.model.clone().ok_or_else(|| {
        anyhow::anyhow!("embedding.model required for {} provider", config.provider)
    })?;
    let dims = config.dims.ok_or_else(|| {
        anyhow::anyhow!("embedding.dims required for {} provider", config.provider)
    })?;
    Ok((model, dims))
}

// ============ Retry ============

/// Exponential backoff with equal jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per batch, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &crate::config::RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }

    /// Upper bound of the delay before retry `attempt` (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Jittered delay before retry `attempt`, in `[ceiling/2, ceiling]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        let half = ceiling / 2;
        let jitter = rand::thread_rng().gen_range(0..=ceiling - half);
        Duration::from_millis(half + jitter)
    }
}

// ============ Adapter ============

/// Batching, validating, retrying front-end to an [`EmbeddingBackend`].
#[derive(Clone)]
pub struct EmbeddingAdapter {
    backend: Arc<dyn EmbeddingBackend>,
    retry: RetryPolicy,
    batch_size: usize,
    max_input_tokens: usize,
    concurrency: usize,
}

impl EmbeddingAdapter {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        retry: RetryPolicy,
        batch_size: usize,
        max_input_tokens: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            backend,
            retry,
            batch_size: batch_size.max(1),
            max_input_tokens,
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(backend: Arc<dyn EmbeddingBackend>, config: &EmbeddingConfig) -> Self {
        Self::new(
            backend,
            RetryPolicy::from_config(&config.retry),
            config.batch_size,
            config.max_input_tokens,
            config.concurrency,
        )
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn dims(&self) -> usize {
        self.backend.dims()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Whether `text` is within the provider's input budget.
    pub fn fits(&self, text: &str) -> bool {
        count_tokens(text) <= self.max_input_tokens
    }

    fn check_payload(&self, text: &str) -> Result<()> {
        let tokens = count_tokens(text);
        if tokens > self.max_input_tokens {
            return Err(VectorizeError::PayloadTooLarge {
                tokens,
                limit: self.max_input_tokens,
            });
        }
        Ok(())
    }

    /// Embed every text, preserving order.
    ///
    /// Fails with [`VectorizeError::PayloadTooLarge`] before any provider
    /// call if one text is over budget.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            self.check_payload(text)?;
        }

        let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts.chunks(self.batch_size))
            .map(|batch| self.embed_batch(batch))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(batches.into_iter().flatten().collect())
    }

    /// Embed one batch with retry.
    pub async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        for text in batch {
            self.check_payload(text)?;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match self.backend.embed_batch(batch).await {
                Ok(vectors) => self.validate(batch.len(), vectors),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(vectors) => return Ok(vectors),
                Err(ProviderError::Permanent(msg)) => {
                    return Err(VectorizeError::EmbeddingUnavailable(msg));
                }
                Err(ProviderError::Transient(msg)) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(VectorizeError::EmbeddingUnavailable(format!(
                            "{} (gave up after {} attempts)",
                            msg, attempt
                        )));
                    }
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %msg,
                        "embedding batch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Embed a search query.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.into_iter().next().ok_or_else(|| {
            VectorizeError::EmbeddingUnavailable("empty embedding response".to_string())
        })
    }

    fn validate(
        &self,
        expected: usize,
        vectors: Vec<Vec<f32>>,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if vectors.len() != expected {
            return Err(ProviderError::Permanent(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                expected
            )));
        }
        let dims = self.backend.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(ProviderError::Permanent(format!(
                "provider returned a {}-dimensional vector, expected {}",
                bad.len(),
                dims
            )));
        }
        Ok(vectors)
    }
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use code_vectorizer::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
