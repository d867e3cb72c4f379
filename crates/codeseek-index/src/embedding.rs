//! Embedding provider boundary and the OpenAI-compatible client.
//!
//! The index and query paths only see the [`Embedder`] trait. A single call
//! is one attempt: retry, backoff, and timeouts are layered on top by
//! [`RetryPolicy`](crate::retry::RetryPolicy).

use std::time::Duration;

use async_trait::async_trait;
use codeseek_core::{CodeseekError, EmbeddingConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A text-to-vector provider.
///
/// Vectors returned by one provider all have the same length. Failures are
/// reported as [`CodeseekError::EmbeddingProvider`], with `retryable` set
/// for rate limits, timeouts, and transient server faults.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the model, recorded in the index metadata.
    fn model_id(&self) -> &str;

    /// Largest input, in tokens, the provider accepts.
    fn max_input_tokens(&self) -> usize;

    /// Vector length, when known before the first call.
    fn dimensions(&self) -> Option<usize> {
        None
    }

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CodeseekError>;

    /// Embed several texts, returning vectors in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CodeseekError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Client for the OpenAI embeddings API and compatible servers.
///
/// # Examples
///
/// ```
/// use codeseek_index::embedding::{Embedder, OpenAiEmbedder};
///
/// let client = OpenAiEmbedder::new("test-key");
/// assert_eq!(client.model_id(), "text-embedding-3-small");
/// assert_eq!(client.dimensions(), Some(1536));
/// ```
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    max_input_tokens: usize,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedder {
    /// Create a client with default settings, including the default
    /// request timeout.
    pub fn new(api_key: &str) -> Self {
        let config = EmbeddingConfig::default();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: config.model,
            dimensions: config.dimensions,
            max_input_tokens: config.max_input_tokens,
        }
    }

    /// Create a client from an [`EmbeddingConfig`] and an explicit key.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::Config`] if the HTTP client cannot be built.
    ///
    /// # Examples
    ///
    /// ```
    /// use codeseek_core::EmbeddingConfig;
    /// use codeseek_index::embedding::{Embedder, OpenAiEmbedder};
    ///
    /// let config = EmbeddingConfig {
    ///     model: "nomic-embed-text".into(),
    ///     base_url: Some("http://localhost:11434/v1/".into()),
    ///     ..EmbeddingConfig::default()
    /// };
    /// let client = OpenAiEmbedder::with_config(&config, "unused").unwrap();
    /// assert_eq!(client.model_id(), "nomic-embed-text");
    /// assert_eq!(client.dimensions(), None);
    /// ```
    pub fn with_config(config: &EmbeddingConfig, api_key: &str) -> Result<Self, CodeseekError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| CodeseekError::Config(format!("failed to build HTTP client: {e}")))?;

        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url,
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_input_tokens: config.max_input_tokens,
        })
    }

    /// Only the `text-embedding-3` family accepts a requested size.
    fn requested_dimensions(&self) -> Option<usize> {
        self.model
            .starts_with("text-embedding-3")
            .then_some(self.dimensions)
    }

    fn build_request<'a>(&'a self, texts: &'a [String]) -> EmbedRequest<'a> {
        EmbedRequest {
            model: &self.model,
            input: texts,
            dimensions: self.requested_dimensions(),
        }
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CodeseekError> {
        debug!(model = %self.model, count = texts.len(), "embedding request");

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.build_request(texts))
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            let message = format!("API returned {status}: {}", body.trim());
            return Err(if is_retryable_status(status) {
                CodeseekError::transient(message)
            } else {
                CodeseekError::permanent(message)
            });
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| CodeseekError::permanent(format!("failed to parse response: {e}")))?;

        into_ordered_vectors(body, texts.len())
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn classify_send_error(e: reqwest::Error) -> CodeseekError {
    if e.is_builder() {
        CodeseekError::permanent(format!("invalid request: {e}"))
    } else {
        CodeseekError::transient(format!("HTTP request failed: {e}"))
    }
}

/// Put response items back in input order and check the count.
fn into_ordered_vectors(
    mut body: EmbedResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, CodeseekError> {
    if body.data.len() != expected {
        return Err(CodeseekError::permanent(format!(
            "expected {expected} embeddings, got {}",
            body.data.len()
        )));
    }
    body.data.sort_by_key(|item| item.index);
    if body.data.iter().enumerate().any(|(i, item)| item.index != i) {
        return Err(CodeseekError::permanent(
            "response indices do not match the request",
        ));
    }
    Ok(body.data.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    fn dimensions(&self) -> Option<usize> {
        self.requested_dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CodeseekError> {
        let texts = [text.to_string()];
        self.request(&texts)
            .await?
            .pop()
            .ok_or_else(|| CodeseekError::permanent("empty response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CodeseekError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}
