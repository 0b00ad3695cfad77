//! Clients for a remote embedding/reranking server.
//!
//! Speaks the text-embeddings-inference wire format:
//!
//! | Route | Request | Response |
//! |-------|---------|----------|
//! | `POST /embed` | `{"inputs": [..], "normalize": bool}` | `[[f32]]` |
//! | `POST /rerank` | `{"query": .., "texts": [..]}` | `[{"index": n, "score": f}]` |
//!
//! Connection failures and 5xx responses surface as `Transport` errors so the
//! retrieval engine can retry them; anything else is a model error.

use async_trait::async_trait;
use folio_core::{EmbedError, Embedder, EmbeddingConfig, EmbeddingOutput, RerankError, Reranker};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Per-request timeout applied by the HTTP client itself.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [&'a str],
    normalize: bool,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [&'a str],
}

#[derive(Deserialize)]
struct RerankScore {
    index: usize,
    score: f32,
}

/// Outcome of a failed call, before it is mapped to a domain error.
enum CallError {
    /// Unreachable, reset or 5xx
    Transport(String),
    /// Rejected request or unreadable body
    Rejected(String),
}

fn build_client() -> Client {
    Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

async fn post_json<B, R>(client: &Client, url: &str, body: &B) -> Result<R, CallError>
where
    B: Serialize + ?Sized,
    R: for<'de> Deserialize<'de>,
{
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| CallError::Transport(format!("POST {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = format!("{url} returned {status}: {body}");
        return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            CallError::Transport(message)
        } else {
            CallError::Rejected(message)
        });
    }

    response
        .json()
        .await
        .map_err(|e| CallError::Rejected(format!("{url} returned invalid JSON: {e}")))
}

fn endpoint(base_url: &str, route: &str) -> String {
    format!("{}/{route}", base_url.trim_end_matches('/'))
}

// ============================================================================
// Embedder
// ============================================================================

/// Embedder backed by a remote `/embed` endpoint.
pub struct HttpEmbedder {
    client: Client,
    url: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    /// Create a client for the server at `base_url`.
    ///
    /// `model` is informational; the server decides which model runs.
    pub fn new(base_url: &str, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: build_client(),
            url: endpoint(base_url, "embed"),
            model: model.into(),
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_text(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut outputs = Vec::with_capacity(texts.len());

        for batch in texts.chunks(config.batch_size.max(1)) {
            debug!("Embedding {} texts via {}", batch.len(), self.url);

            let request = EmbedRequest {
                inputs: batch,
                normalize: config.normalize,
            };
            let vectors: Vec<Vec<f32>> = post_json(&self.client, &self.url, &request)
                .await
                .map_err(|e| match e {
                    CallError::Transport(m) => EmbedError::Transport(m),
                    CallError::Rejected(m) => EmbedError::Inference(m),
                })?;

            if vectors.len() != batch.len() {
                return Err(EmbedError::Inference(format!(
                    "server returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }

            for (vector, text) in vectors.into_iter().zip(batch) {
                if vector.len() != self.dimension {
                    return Err(EmbedError::DimensionMismatch {
                        expected: self.dimension,
                        actual: vector.len(),
                    });
                }
                outputs.push(EmbeddingOutput {
                    embedding: vector,
                    token_count: text.split_whitespace().count(),
                });
            }
        }

        Ok(outputs)
    }
}

// ============================================================================
// Reranker
// ============================================================================

/// Cross-encoder reranker backed by a remote `/rerank` endpoint.
pub struct HttpReranker {
    client: Client,
    url: String,
    model: String,
}

impl HttpReranker {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: &str, model: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            url: endpoint(base_url, "rerank"),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, RerankError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Reranking {} candidates via {}", texts.len(), self.url);

        let request = RerankRequest { query, texts };
        let scored: Vec<RerankScore> = post_json(&self.client, &self.url, &request)
            .await
            .map_err(|e| match e {
                CallError::Transport(m) => RerankError::Transport(m),
                CallError::Rejected(m) => RerankError::Model(m),
            })?;

        // The server sorts by score; put scores back in input order
        let mut scores: Vec<Option<f32>> = vec![None; texts.len()];
        for item in &scored {
            let slot = scores.get_mut(item.index).ok_or_else(|| {
                RerankError::Model(format!(
                    "score index {} out of range for {} candidates",
                    item.index,
                    texts.len()
                ))
            })?;
            *slot = Some(item.score);
        }

        let filled = scores.iter().filter(|s| s.is_some()).count();
        if filled != texts.len() {
            return Err(RerankError::ScoreCount {
                expected: texts.len(),
                actual: filled,
            });
        }

        Ok(scores.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use serde_json::{Value, json};

    /// Serve `router` on an ephemeral port and return its base URL.
    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// A base URL nothing is listening on.
    async fn dead_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    async fn embed_handler(Json(body): Json<Value>) -> Json<Value> {
        let inputs = body["inputs"].as_array().cloned().unwrap_or_default();
        let vectors: Vec<Vec<f32>> = inputs
            .iter()
            .map(|t| {
                let len = t.as_str().unwrap_or_default().chars().count() as f32;
                vec![len, 1.0, 0.0]
            })
            .collect();
        Json(json!(vectors))
    }

    #[test]
    fn test_endpoint_joins_paths() {
        assert_eq!(endpoint("http://h:8080/", "embed"), "http://h:8080/embed");
        assert_eq!(endpoint("http://h:8080", "rerank"), "http://h:8080/rerank");
    }

    #[tokio::test]
    async fn test_http_embedder_batches_requests() {
        let url = spawn_server(Router::new().route("/embed", post(embed_handler))).await;
        let embedder = HttpEmbedder::new(&url, "tei", 3);
        let config = EmbeddingConfig {
            normalize: false,
            batch_size: 2,
        };

        let outputs = embedder
            .embed_text(&["a", "bb", "ccc"], &config)
            .await
            .unwrap();

        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].embedding, vec![1.0, 1.0, 0.0]);
        assert_eq!(outputs[2].embedding, vec![3.0, 1.0, 0.0]);
        assert_eq!(embedder.model_name(), "tei");
    }

    #[tokio::test]
    async fn test_http_embedder_dimension_mismatch() {
        let url = spawn_server(Router::new().route("/embed", post(embed_handler))).await;
        let embedder = HttpEmbedder::new(&url, "tei", 384);

        let result = embedder
            .embed_query("q", &EmbeddingConfig::default())
            .await;
        assert!(matches!(
            result,
            Err(EmbedError::DimensionMismatch {
                expected: 384,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_http_embedder_unreachable_is_transport() {
        let embedder = HttpEmbedder::new(&dead_url().await, "tei", 3);
        let result = embedder
            .embed_query("q", &EmbeddingConfig::default())
            .await;
        assert!(matches!(result, Err(EmbedError::Transport(_))));
    }

    #[tokio::test]
    async fn test_http_embedder_client_error_is_inference() {
        let router = Router::new().route(
            "/embed",
            post(|| async { (axum::http::StatusCode::UNPROCESSABLE_ENTITY, "input too long") }),
        );
        let embedder = HttpEmbedder::new(&spawn_server(router).await, "tei", 3);

        let result = embedder
            .embed_query("q", &EmbeddingConfig::default())
            .await;
        match result {
            Err(EmbedError::Inference(msg)) => assert!(msg.contains("input too long")),
            other => panic!("unexpected result: {:?}", other.map(|o| o.embedding)),
        }
    }

    #[tokio::test]
    async fn test_http_embedder_server_error_is_transport() {
        let router = Router::new().route(
            "/embed",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "loading") }),
        );
        let embedder = HttpEmbedder::new(&spawn_server(router).await, "tei", 3);

        let result = embedder
            .embed_query("q", &EmbeddingConfig::default())
            .await;
        assert!(matches!(result, Err(EmbedError::Transport(_))));
    }

    #[tokio::test]
    async fn test_http_reranker_restores_input_order() {
        // Server answers sorted by score, like TEI does
        let router = Router::new().route(
            "/rerank",
            post(|| async {
                Json(json!([
                    {"index": 2, "score": 0.9},
                    {"index": 0, "score": 0.5},
                    {"index": 1, "score": -1.2}
                ]))
            }),
        );
        let reranker = HttpReranker::new(&spawn_server(router).await, "ms-marco");

        let scores = reranker.score("q", &["a", "b", "c"]).await.unwrap();
        assert_eq!(scores, vec![0.5, -1.2, 0.9]);
    }

    #[tokio::test]
    async fn test_http_reranker_partial_result_is_error() {
        let router = Router::new().route(
            "/rerank",
            post(|| async { Json(json!([{"index": 0, "score": 0.5}])) }),
        );
        let reranker = HttpReranker::new(&spawn_server(router).await, "ms-marco");

        let result = reranker.score("q", &["a", "b"]).await;
        assert!(matches!(
            result,
            Err(RerankError::ScoreCount {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_http_reranker_index_out_of_range() {
        let router = Router::new().route(
            "/rerank",
            post(|| async { Json(json!([{"index": 5, "score": 0.5}])) }),
        );
        let reranker = HttpReranker::new(&spawn_server(router).await, "ms-marco");

        let result = reranker.score("q", &["a"]).await;
        assert!(matches!(result, Err(RerankError::Model(_))));
    }

    #[tokio::test]
    async fn test_http_reranker_unreachable_is_transport() {
        let reranker = HttpReranker::new(&dead_url().await, "ms-marco");
        let result = reranker.score("q", &["a"]).await;
        assert!(matches!(result, Err(RerankError::Transport(_))));
    }
}
