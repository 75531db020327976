//! HTTP embedding backends.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use super::{EmbeddingBackend, ProviderError};

fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// 429 and 5xx are worth retrying; any other non-success status is not.
fn classify_status(provider: &str, status: StatusCode, body: String) -> ProviderError {
    let msg = format!("{} API error {}: {}", provider, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transient(msg)
    } else {
        ProviderError::Permanent(msg)
    }
}

/// Timeouts and connection failures are transient; a body that fails to
/// decode is not.
fn classify_transport(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::Permanent(format!("{} returned an unreadable body: {}", provider, err))
    } else {
        ProviderError::Transient(format!("{} request failed: {}", provider, err))
    }
}

fn parse_vector(value: &serde_json::Value, provider: &str) -> Result<Vec<f32>, ProviderError> {
    let items = value.as_array().ok_or_else(|| {
        ProviderError::Permanent(format!("Invalid {} response: embedding is not an array", provider))
    })?;
    items
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                ProviderError::Permanent(format!(
                    "Invalid {} response: non-numeric embedding value",
                    provider
                ))
            })
        })
        .collect()
}

// ============ OpenAI ============

/// Backend for `POST {base_url}/v1/embeddings`.
pub struct OpenAiBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
}

impl OpenAiBackend {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: String,
        dims: usize,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport("OpenAI", e))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status("OpenAI", status, body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_transport("OpenAI", e))?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        ProviderError::Permanent("Invalid OpenAI response: missing data array".to_string())
    })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item.get("embedding").ok_or_else(|| {
            ProviderError::Permanent("Invalid OpenAI response: missing embedding".to_string())
        })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Backend for a local Ollama instance's `POST {url}/api/embed`.
pub struct OllamaBackend {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaBackend {
    pub fn new(url: &str, model: String, dims: usize, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ProviderError::Transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status("Ollama", status, body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_transport("Ollama", e))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            ProviderError::Permanent(
                "Invalid Ollama response: missing embeddings array".to_string(),
            )
        })?;

    embeddings
        .iter()
        .map(|e| parse_vector(e, "Ollama"))
        .collect()
}
