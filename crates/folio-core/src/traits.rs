//! Core traits for folio components.
//!
//! - [`Embedder`]: text to vector
//! - [`Reranker`]: (query, text) pairs to relevance scores
//! - [`ChunkStore`]: persistence, similarity search and positional lookup
//!
//! Every collaborator of the retrieval engine sits behind one of these traits
//! so that model servers, databases and test doubles are interchangeable.

use async_trait::async_trait;

use crate::error::{EmbedError, RerankError, StoreError};
use crate::types::{
    Book, Chunk, EmbeddingConfig, EmbeddingOutput, NeighborQuery, ScoredChunk, StoreStats,
    VectorQuery,
};

// ============================================================================
// Embedding
// ============================================================================

/// Trait for generating embeddings.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model name/identifier.
    fn model_name(&self) -> &str;

    /// Embedding dimension.
    fn dimension(&self) -> usize;

    /// Embed text content.
    async fn embed_text(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError>;

    /// Embed a query (may use different instruction).
    async fn embed_query(
        &self,
        query: &str,
        config: &EmbeddingConfig,
    ) -> Result<EmbeddingOutput, EmbedError> {
        let results = self.embed_text(&[query], config).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Inference("empty embedding result".to_string()))
    }
}

// ============================================================================
// Reranking
// ============================================================================

/// Trait for pairwise relevance scoring.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Model name/identifier.
    fn model_name(&self) -> &str;

    /// Score each `(query, texts[i])` pair.
    ///
    /// Returns exactly one score per text, in input order. Higher is more
    /// relevant; the scale is model-specific.
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, RerankError>;
}

// ============================================================================
// Chunk storage
// ============================================================================

/// Trait for chunk storage and search.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Create tables and the cosine vector index if missing.
    async fn init(&self) -> Result<(), StoreError>;

    /// Vector dimension the store was created with.
    fn dimension(&self) -> usize;

    /// Insert or replace a book record.
    async fn upsert_book(&self, book: &Book) -> Result<(), StoreError>;

    /// Look up a book.
    async fn get_book(&self, book_id: &str) -> Result<Option<Book>, StoreError>;

    /// Insert new chunks. Every chunk must carry a vector.
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError>;

    /// Nearest chunks to the query vector, by descending cosine similarity.
    async fn search(&self, query: VectorQuery) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Chunks inside a positional window, ordered by `start_pos` ascending.
    async fn neighbors(&self, query: &NeighborQuery) -> Result<Vec<Chunk>, StoreError>;

    /// Get store statistics.
    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Drop the vector index and delete every book and chunk.
    async fn reset(&self) -> Result<(), StoreError>;
}
