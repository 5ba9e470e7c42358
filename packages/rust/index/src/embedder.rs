//! Dense + sparse embedding.
//!
//! Dense vectors come from an Ollama-compatible `/api/embed` endpoint and are
//! L2-normalized locally; sparse vectors come from the local
//! [`SparseEncoder`].

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use companyintel_shared::{
    BackendSettings, CompanyIntelError, EmbeddingConfig, Result, SparseVector,
};

use crate::sparse::SparseEncoder;

/// Base delay for retry backoff; doubles per attempt.
const RETRY_BASE: Duration = Duration::from_millis(500);

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    truncate: bool,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Embedding client producing both vector kinds for each text.
pub struct Embedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    batch_size: usize,
    max_retries: u32,
    retry_base: Duration,
    sparse: SparseEncoder,
}

impl Embedder {
    pub fn new(settings: &BackendSettings, config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CompanyIntelError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", settings.embed_endpoint.trim_end_matches('/')),
            model: settings.embed_model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries.max(1),
            retry_base: RETRY_BASE,
            sparse: SparseEncoder::default(),
        })
    }

    /// Override the retry backoff base (tests use a tiny one).
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed texts in batches. Output vectors are index-aligned with `texts`.
    #[instrument(skip_all, fields(texts = texts.len()))]
    pub async fn embed_texts(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, Vec<SparseVector>)> {
        let mut dense = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(batch = i, size = batch.len(), "embedding batch");
            let vectors = self.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                return Err(CompanyIntelError::integrity(format!(
                    "embedding service returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }
            for vector in vectors {
                if vector.len() != self.dimension {
                    return Err(CompanyIntelError::integrity(format!(
                        "expected {}-dimensional embeddings, got {}",
                        self.dimension,
                        vector.len()
                    )));
                }
                dense.push(l2_normalize(vector));
            }
        }

        let sparse = texts.iter().map(|t| self.sparse.encode(t)).collect();

        info!(vectors = dense.len(), "embedded texts");
        Ok((dense, sparse))
    }

    /// Embed a single query; identical to a one-element [`embed_texts`](Self::embed_texts).
    pub async fn embed_query(&self, text: &str) -> Result<(Vec<f32>, SparseVector)> {
        let (mut dense, mut sparse) = self.embed_texts(&[text.to_string()]).await?;
        match (dense.pop(), sparse.pop()) {
            (Some(d), Some(s)) => Ok((d, s)),
            _ => Err(CompanyIntelError::integrity("no embedding returned for query")),
        }
    }

    /// One `/api/embed` call, retried on 429, 5xx and transport errors.
    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: batch,
            truncate: true,
        };

        let mut attempt: u32 = 0;
        loop {
            let outcome = self.client.post(&self.endpoint).json(&request).send().await;
            let retry_reason = match outcome {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: EmbedResponse = resp.json().await.map_err(|e| {
                        CompanyIntelError::Embedding(format!("invalid embedding response: {e}"))
                    })?;
                    return Ok(parsed.embeddings);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if !should_retry(status) {
                        return Err(CompanyIntelError::Embedding(format!(
                            "embedding request failed ({status}): {body}"
                        )));
                    }
                    format!("HTTP {status}")
                }
                Err(e) => {
                    if !(e.is_timeout() || e.is_connect() || e.is_request()) {
                        return Err(CompanyIntelError::Embedding(format!(
                            "embedding request failed: {e}"
                        )));
                    }
                    e.to_string()
                }
            };

            attempt += 1;
            if attempt >= self.max_retries {
                return Err(CompanyIntelError::Embedding(format!(
                    "embedding request failed after {attempt} attempts: {retry_reason}"
                )));
            }
            let delay = self.retry_base * (1 << attempt.min(5));
            warn!(attempt, reason = %retry_reason, delay_ms = delay.as_millis() as u64, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Scale to unit length; the zero vector is returned unchanged.
fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}
