//! Embedding adapter
//!
//! Turns text into fixed-dimension vectors via an OpenAI-compatible
//! `/embeddings` endpoint. Callers treat failures as retryable; no caching
//! is done here (the tool synchronizer caches by content hash instead).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::constants::{EMBEDDING_DIMENSION, EMBEDDING_MODEL};
use crate::{GatewayError, Result};

/// Client producing fixed-dimension embeddings
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed one text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts; default implementation loops
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Embedding client speaking the OpenAI embeddings API
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl HttpEmbeddingClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: EMBEDDING_MODEL.to_string(),
            dimension: EMBEDDING_DIMENSION,
        }
    }

    /// Override the dimension (tests use small vectors)
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    async fn request(&self, inputs: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                input: inputs,
                model: &self.model,
                dimensions: self.dimension,
            })
            .send()
            .await
            .map_err(|e| GatewayError::embedding(format!("embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::embedding(format!(
                "embedding provider returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::embedding(format!("invalid embedding response: {}", e)))?;

        let mut vectors = Vec::with_capacity(parsed.data.len());
        for datum in parsed.data {
            if datum.embedding.len() != self.dimension {
                return Err(GatewayError::embedding(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    datum.embedding.len()
                )));
            }
            vectors.push(datum.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(vec![text]).await?;
        vectors
            .pop()
            .ok_or_else(|| GatewayError::embedding("embedding provider returned no vectors"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = self.request(inputs).await?;
        if vectors.len() != texts.len() {
            return Err(GatewayError::embedding(format!(
                "embedding provider returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }
}

/// Deterministic embedding for environments without a provider key.
///
/// Hashes the text into a unit vector; useful for local development where
/// relevance quality does not matter, and for tests.
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use sha2::{Digest, Sha256};

        let mut vector = vec![0.0f32; self.dimension];
        // Stretch the digest over the vector by re-hashing with a counter
        let mut filled = 0;
        let mut counter = 0u32;
        while filled < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(counter.to_le_bytes());
            hasher.update(text.as_bytes());
            let digest = hasher.finalize();
            for byte in digest.iter() {
                if filled >= self.dimension {
                    break;
                }
                vector[filled] = (*byte as f32 - 127.5) / 127.5;
                filled += 1;
            }
            counter += 1;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

/// Build the process-wide embedding client from configuration
pub fn create_embedding_client(
    config: &crate::config::EmbeddingConfig,
    http_client: reqwest::Client,
) -> Arc<dyn EmbeddingClient> {
    if config.api_key.is_empty() {
        tracing::warn!("no embedding API key configured; using deterministic hash embeddings");
        Arc::new(HashEmbeddingClient::new(EMBEDDING_DIMENSION))
    } else {
        Arc::new(HttpEmbeddingClient::new(
            http_client,
            config.base_url.clone(),
            config.api_key.clone(),
        ))
    }
}
