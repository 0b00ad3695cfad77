//! Embedder pool for concurrent embedding operations.

use folio_core::{EmbedError, Embedder, EmbeddingConfig, EmbeddingOutput};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Embedder wrapper with concurrency control.
pub struct EmbedderPool {
    embedder: Arc<dyn Embedder>,
    /// Semaphore to limit concurrent inference
    semaphore: Semaphore,
    /// Maximum concurrent operations
    max_concurrent: usize,
}

impl EmbedderPool {
    /// Create a new embedder pool.
    pub fn new(embedder: Arc<dyn Embedder>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            embedder,
            semaphore: Semaphore::new(max_concurrent),
            max_concurrent,
        }
    }

    /// Get the embedding dimension.
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Get the model name.
    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Get the underlying embedder.
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    /// Embed one batch of texts, waiting for a free slot.
    pub async fn embed_batch(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| EmbedError::Inference(format!("semaphore error: {e}")))?;

        self.embedder.embed_text(texts, config).await
    }

    /// Embed any number of texts.
    ///
    /// Splits `texts` into `config.batch_size` batches, embeds up to
    /// `max_concurrent` of them at once, and returns outputs in input order.
    pub async fn embed_all(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
        let batch_size = config.batch_size.max(1);
        debug!(
            "Embedding {} texts in batches of {} ({} concurrent)",
            texts.len(),
            batch_size,
            self.max_concurrent
        );

        let batches = try_join_all(
            texts
                .chunks(batch_size)
                .map(|batch| self.embed_batch(batch, config)),
        )
        .await?;

        let outputs: Vec<EmbeddingOutput> = batches.into_iter().flatten().collect();
        if outputs.len() != texts.len() {
            return Err(EmbedError::Inference(format!(
                "embedder returned {} outputs for {} texts",
                outputs.len(),
                texts.len()
            )));
        }
        Ok(outputs)
    }

    /// Embed a single query.
    pub async fn embed_query(
        &self,
        query: &str,
        config: &EmbeddingConfig,
    ) -> Result<EmbeddingOutput, EmbedError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| EmbedError::Inference(format!("semaphore error: {e}")))?;

        self.embedder.embed_query(query, config).await
    }

    /// Get pool statistics.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get max concurrent operations.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TEST_DIM: usize = 4;

    /// Mock embedder that records peak concurrency.
    struct MockEmbedder {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl MockEmbedder {
        fn new() -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for MockEmbedder {
        fn model_name(&self) -> &'static str {
            "mock-embedder"
        }

        fn dimension(&self) -> usize {
            TEST_DIM
        }

        async fn embed_text(
            &self,
            texts: &[&str],
            _config: &EmbeddingConfig,
        ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            // Encode text length in the first component
            Ok(texts
                .iter()
                .map(|text| EmbeddingOutput {
                    embedding: vec![text.len() as f32, 0.0, 0.0, 0.0],
                    token_count: text.split_whitespace().count(),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_pool_creation() {
        let pool = EmbedderPool::new(Arc::new(MockEmbedder::new()), 4);

        assert_eq!(pool.dimension(), TEST_DIM);
        assert_eq!(pool.model_name(), "mock-embedder");
        assert_eq!(pool.max_concurrent(), 4);
        assert_eq!(pool.available_permits(), 4);
        assert_eq!(pool.embedder().dimension(), TEST_DIM);
    }

    #[tokio::test]
    async fn test_pool_zero_concurrency_clamped() {
        let pool = EmbedderPool::new(Arc::new(MockEmbedder::new()), 0);
        assert_eq!(pool.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_embed_query() {
        let pool = EmbedderPool::new(Arc::new(MockEmbedder::new()), 4);
        let result = pool
            .embed_query("search query", &EmbeddingConfig::default())
            .await
            .unwrap();

        assert_eq!(result.embedding.len(), TEST_DIM);
        assert_eq!(result.token_count, 2);
    }

    #[tokio::test]
    async fn test_embed_all_preserves_order() {
        let mock = Arc::new(MockEmbedder::new());
        let pool = EmbedderPool::new(mock.clone(), 2);
        let config = EmbeddingConfig {
            normalize: true,
            batch_size: 2,
        };

        let texts = ["a", "bb", "ccc", "dddd", "eeeee"];
        let outputs = pool.embed_all(&texts, &config).await.unwrap();

        let lengths: Vec<f32> = outputs.iter().map(|o| o.embedding[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_embed_all_respects_concurrency_limit() {
        let mock = Arc::new(MockEmbedder::new());
        let pool = EmbedderPool::new(mock.clone(), 2);
        let config = EmbeddingConfig {
            normalize: true,
            batch_size: 1,
        };

        let texts = ["a"; 8];
        pool.embed_all(&texts, &config).await.unwrap();

        assert!(mock.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_embed_all_empty() {
        let pool = EmbedderPool::new(Arc::new(MockEmbedder::new()), 4);
        let outputs = pool
            .embed_all(&[], &EmbeddingConfig::default())
            .await
            .unwrap();
        assert!(outputs.is_empty());
    }
}
