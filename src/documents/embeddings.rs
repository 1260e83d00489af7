//! Sentence Embeddings
//!
//! Maps chunk and query text into a shared vector space. Two backends:
//! a local feature-hashing model that needs no weights, and a client for an
//! OpenAI-compatible `/embeddings` endpoint serving a pretrained model.
//!
//! Backends are loaded once per process and shared as `Arc<dyn Embedder>`.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::retry::{retry_backoff, should_retry};

/// Dimensionality of the hashing model when none is configured.
pub const DEFAULT_HASHING_DIM: usize = 256;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding model failed to load: {0}")]
    ModelLoad(String),
    #[error("Embedding generation failed: {0}")]
    GenerationFailed(String),
    #[error("Embedding has dimension {actual}, model produces {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Embedding vector
pub type Embedding = Vec<f32>;

/// A sentence-embedding model.
///
/// `embed_batch` returns one vector per input, in input order, each of
/// length `dimension()`. The same model id must be used to build an index
/// and to query it.
pub trait Embedder: Send + Sync {
    /// Identifier recorded in the index metadata
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError>;

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationFailed("model returned no vector".to_string()))
    }
}

/// Build the configured embedding backend.
pub fn load_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let embedder: Arc<dyn Embedder> = match config.provider {
        EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(
            config.dimensions.unwrap_or(DEFAULT_HASHING_DIM),
        )?),
        EmbeddingProvider::Http => Arc::new(HttpEmbedder::from_config(config)?),
    };
    info!(model = embedder.model_id(), dimension = embedder.dimension(), "Embedding model loaded");
    Ok(embedder)
}

// ============ FEATURE HASHING ============

/// Local embeddings using feature hashing.
///
/// Each lowercase alphanumeric token is hashed to a fixed bucket and the
/// resulting term-frequency vector is L2-normalized. CRC32 keeps bucket
/// assignment stable across toolchains, so a persisted index stays valid.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::ModelLoad("hashing dimension must be at least 1".to_string()));
        }
        Ok(Self {
            dimension,
            model_id: format!("feature-hash-crc32-{}", dimension),
        })
    }

    fn bucket(&self, token: &str) -> usize {
        crc32fast::hash(token.as_bytes()) as usize % self.dimension
    }

    fn embed_one(&self, text: &str) -> Embedding {
        let mut tf = vec![0.0f32; self.dimension];

        for token in text.split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty())
        {
            tf[self.bucket(&token.to_lowercase())] += 1.0;
        }

        let norm: f32 = tf.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut tf {
                *x /= norm;
            }
        }
        tf
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ HTTP ENDPOINT ============

/// Blocking client for an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    batch_size: usize,
    max_retries: usize,
}

impl HttpEmbedder {
    /// Connects to the endpoint. When no dimension is configured, one probe
    /// request discovers it.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        if config.model.trim().is_empty() {
            return Err(EmbeddingError::ModelLoad("missing embedding model name".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(key) = std::env::var(&config.api_key_env) {
            let auth = format!("Bearer {}", key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth)
                    .map_err(|_| EmbeddingError::ModelLoad("invalid embedding API key".to_string()))?,
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::ModelLoad(format!("failed to build HTTP client: {}", e)))?;

        let mut embedder = Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimension: config.dimensions.unwrap_or(0),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries.max(1),
        };

        if embedder.dimension == 0 {
            let probe = embedder
                .request(&["dimension probe"])
                .map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;
            embedder.dimension = probe.first().map(|v| v.len()).unwrap_or(0);
            if embedder.dimension == 0 {
                return Err(EmbeddingError::ModelLoad("endpoint returned an empty vector".to_string()));
            }
        }

        Ok(embedder)
    }

    fn request(&self, inputs: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };

        let mut attempt = 0usize;
        loop {
            let failure = match self.client.post(&self.endpoint).json(&body).send() {
                Ok(resp) if resp.status().is_success() => {
                    let mut parsed: EmbeddingResponse = resp
                        .json()
                        .map_err(|e| EmbeddingError::GenerationFailed(format!("bad response body: {}", e)))?;
                    parsed.data.sort_by_key(|entry| entry.index);
                    if parsed.data.len() != inputs.len() {
                        return Err(EmbeddingError::GenerationFailed(format!(
                            "endpoint returned {} embeddings for {} inputs",
                            parsed.data.len(),
                            inputs.len()
                        )));
                    }
                    return Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().unwrap_or_else(|_| "<body unavailable>".to_string());
                    if !should_retry(status) {
                        return Err(EmbeddingError::GenerationFailed(format!("{}: {}", status, text)));
                    }
                    format!("{}: {}", status, text)
                }
                Err(e) => {
                    if !(e.is_timeout() || e.is_connect()) {
                        return Err(EmbeddingError::GenerationFailed(e.to_string()));
                    }
                    e.to_string()
                }
            };

            attempt += 1;
            if attempt >= self.max_retries {
                return Err(EmbeddingError::GenerationFailed(failure));
            }
            warn!(attempt, error = %failure, "Embedding request failed, retrying");
            thread::sleep(retry_backoff(attempt));
        }
    }
}

impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(size = batch.len(), "Embedding batch");
            for vector in self.request(batch)? {
                if vector.len() != self.dimension {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.dimension,
                        actual: vector.len(),
                    });
                }
                out.push(vector);
            }
        }
        Ok(out)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
