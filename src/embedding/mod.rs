//! Embedding provider abstraction: a small capability trait any backend can
//! implement, plus an HTTP implementation of the JSON contract and a caching
//! decorator over any `Provider`.

pub mod cache;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::CachingProvider;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("empty input passed to embedding provider")]
    EmptyInput,
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("embedding provider rejected credentials: {0}")]
    Auth(String),
    #[error("embedding provider rate limited the request")]
    RateLimited,
    #[error("operation cancelled")]
    Cancelled,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Capability set any embedding backend must provide. The cache in
/// `cache.rs` wraps one `Provider` to produce another, so callers can compose
/// freely without knowing whether caching is in play.
pub trait Provider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
    fn model(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn ping(&self) -> Result<(), ProviderError>;
}

const MAX_BATCH: usize = 2048;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: EmbedInput<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EmbedInput<'a> {
    Many(&'a [String]),
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// HTTP embedding provider implementing the JSON contract: POST
/// `{model, input, dimensions?}`, expect `{data: [{index, embedding}, ...]}`.
/// Retries on 429/5xx with exponential backoff, never on 4xx auth errors.
///
/// `reqwest`'s client is async-only in this crate's dependency set; `embed`/
/// `embed_batch` are synchronous like the rest of the public API, so the
/// provider drives its own requests through an owned `tokio::Runtime`, the
/// same async-as-sync bridge the store uses around `sqlx`.
pub struct HttpProvider {
    client: reqwest::Client,
    rt: tokio::runtime::Runtime,
    endpoint: String,
    model: String,
    dimensions: usize,
    max_retries: u32,
}

impl HttpProvider {
    pub fn new(endpoint: String, model: String, dimensions: usize, max_retries: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("HTTP client configuration is static and valid");
        let rt = tokio::runtime::Runtime::new().expect("failed to start embedding provider runtime");
        HttpProvider { client, rt, endpoint, model, dimensions, max_retries }
    }

    fn embed_batch_unsplit(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.rt.block_on(self.embed_batch_unsplit_async(texts))
    }

    async fn embed_batch_unsplit_async(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = EmbedRequest {
            model: &self.model,
            input: EmbedInput::Many(texts),
            dimensions: Some(self.dimensions),
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let response = self.client.post(&self.endpoint).json(&body).send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbedResponse = resp
                            .json()
                            .await
                            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
                        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
                        for datum in parsed.data {
                            if datum.index < ordered.len() {
                                ordered[datum.index] = Some(datum.embedding);
                            }
                        }
                        return ordered
                            .into_iter()
                            .enumerate()
                            .map(|(i, v)| {
                                v.ok_or_else(|| {
                                    ProviderError::Unavailable(format!("response missing embedding at index {i}"))
                                })
                            })
                            .collect();
                    }
                    if status.as_u16() == 401 {
                        return Err(ProviderError::Auth(format!("HTTP {status}")));
                    }
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt > self.max_retries {
                        if status.as_u16() == 429 {
                            return Err(ProviderError::RateLimited);
                        }
                        return Err(ProviderError::Unavailable(format!("HTTP {status}")));
                    }
                }
                Err(e) => {
                    if e.is_timeout() || e.is_connect() {
                        if attempt > self.max_retries {
                            return Err(ProviderError::Unavailable(e.to_string()));
                        }
                    } else {
                        return Err(ProviderError::Unavailable(e.to_string()));
                    }
                }
            }

            let backoff = Duration::from_millis(200 * 2u64.saturating_pow(attempt.saturating_sub(1)));
            tokio::time::sleep(backoff).await;
        }
    }
}

impl Provider for HttpProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.is_empty() {
            return Err(ProviderError::EmptyInput);
        }
        let mut results = self.embed_batch(std::slice::from_ref(&text.to_string()))?;
        Ok(results.remove(0))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() || texts.iter().any(|t| t.is_empty()) {
            return Err(ProviderError::EmptyInput);
        }
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH) {
            out.extend(self.embed_batch_unsplit(chunk)?);
        }
        Ok(out)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn ping(&self) -> Result<(), ProviderError> {
        self.embed("ping").map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn embeds_single_text() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(200).json_body(json!({
                "data": [{"index": 0, "embedding": [1.0, 2.0, 3.0]}]
            }));
        });

        let provider = HttpProvider::new(server.url("/embed"), "test-model".into(), 3, 3);
        let v = provider.embed("hello").unwrap();
        assert_eq!(v, vec![1.0, 2.0, 3.0]);
        mock.assert();
    }

    #[test]
    fn reorders_by_index() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(200).json_body(json!({
                "data": [
                    {"index": 1, "embedding": [2.0]},
                    {"index": 0, "embedding": [1.0]},
                ]
            }));
        });

        let provider = HttpProvider::new(server.url("/embed"), "test-model".into(), 1, 3);
        let out = provider.embed_batch(&["a".into(), "b".into()]).unwrap();
        assert_eq!(out, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn empty_input_is_rejected() {
        let provider = HttpProvider::new("http://localhost/embed".into(), "m".into(), 1, 3);
        assert!(matches!(provider.embed(""), Err(ProviderError::EmptyInput)));
    }

    #[test]
    fn auth_error_does_not_retry() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(401);
        });

        let provider = HttpProvider::new(server.url("/embed"), "m".into(), 1, 3);
        let err = provider.embed("hi").unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
        assert_eq!(mock.hits(), 1);
    }

    #[test]
    fn rate_limit_exhausts_retries_then_errors() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(429);
        });

        let provider = HttpProvider::new(server.url("/embed"), "m".into(), 1, 1);
        let err = provider.embed("hi").unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited));
        assert_eq!(mock.hits(), 2);
    }
}
