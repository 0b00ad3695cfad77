//! Zero-vector embedder.
//!
//! [`NoopEmbedder`] answers every request with zero vectors. It keeps wiring
//! tests and `folio status` free of any model dependency.

use async_trait::async_trait;
use folio_core::{EmbedError, Embedder, EmbeddingConfig, EmbeddingOutput};

/// No-op embedder that returns zero-vectors.
///
/// # Example
///
/// ```rust
/// use folio_embed::NoopEmbedder;
/// use folio_core::{Embedder, EmbeddingConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let embedder = NoopEmbedder::new();
/// let outputs = embedder
///     .embed_text(&["起重机", "crane"], &EmbeddingConfig::default())
///     .await?;
///
/// assert_eq!(outputs.len(), 2);
/// assert_eq!(outputs[0].embedding.len(), 384);
/// assert!(outputs[0].embedding.iter().all(|&v| v == 0.0));
/// # Ok(())
/// # }
/// ```
pub struct NoopEmbedder {
    dimension: usize,
}

impl NoopEmbedder {
    /// Create a new no-op embedder with default dimension (384).
    #[must_use]
    pub fn new() -> Self {
        Self::with_dimension(384)
    }

    /// Create a new no-op embedder with custom dimension.
    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for NoopEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for NoopEmbedder {
    fn model_name(&self) -> &str {
        "noop"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_text(
        &self,
        texts: &[&str],
        _config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
        Ok(texts
            .iter()
            .map(|_| EmbeddingOutput {
                embedding: vec![0.0; self.dimension],
                token_count: 0,
            })
            .collect())
    }
}
