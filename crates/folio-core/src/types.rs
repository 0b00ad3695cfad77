//! Core types for folio.
//!
//! ## Stored entities
//! - [`Book`]: a document-level record
//! - [`Chunk`]: three consecutive sentences of a page, with their embedding
//!
//! ## Embeddings
//! - [`EmbeddingConfig`], [`EmbeddingOutput`]
//!
//! ## Store queries
//! - [`VectorQuery`]: nearest-neighbour lookup
//! - [`NeighborQuery`]: exact positional range lookup on one page
//! - [`ScoredChunk`]: a chunk paired with its cosine similarity
//!
//! ## Requests and responses
//! - [`SearchRequest`]: the parameters of one retrieval
//! - [`SearchResponse`]: either ranked [`SearchHit`]s or an [`Expansion`]

use serde::{Deserialize, Serialize};

/// Number of sentences grouped into one chunk.
pub const SENTENCES_PER_CHUNK: u32 = 3;

// ============================================================================
// Stored entities
// ============================================================================

/// A document-level entity. Created once at ingestion, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Caller-supplied unique identifier
    pub book_id: String,
    pub title: String,
    pub author: String,
}

/// A retrievable unit of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `{book_id}_chunk_{page_number}_{start_pos}`; identity only, never parsed
    pub chunk_id: String,
    /// Owning book
    pub book_id: String,
    /// Concatenated sentences
    pub text: String,
    /// Page number (1-indexed)
    pub page_number: u32,
    /// First sentence offset on the page (1-indexed)
    pub start_pos: u32,
    /// `start_pos + SENTENCES_PER_CHUNK`, even for a short trailing chunk
    pub end_pos: u32,
    /// Embedding vector (absent on results that do not need it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

impl Chunk {
    /// Create a chunk without an embedding.
    #[must_use]
    pub fn new(book_id: &str, page_number: u32, start_pos: u32, text: impl Into<String>) -> Self {
        Self {
            chunk_id: Self::compose_id(book_id, page_number, start_pos),
            book_id: book_id.to_string(),
            text: text.into(),
            page_number,
            start_pos,
            end_pos: start_pos + SENTENCES_PER_CHUNK,
            vector: None,
        }
    }

    /// Render the canonical chunk identifier.
    #[must_use]
    pub fn compose_id(book_id: &str, page_number: u32, start_pos: u32) -> String {
        format!("{book_id}_chunk_{page_number}_{start_pos}")
    }

    /// Attach an embedding.
    #[must_use]
    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// Copy of this chunk without its vector.
    #[must_use]
    pub fn without_vector(&self) -> Self {
        Self {
            vector: None,
            ..self.clone()
        }
    }
}

/// Concatenate text fragments in order.
///
/// CJK fragments are joined directly; a single space is inserted only where
/// an ASCII fragment end meets an ASCII fragment start.
#[must_use]
pub fn join_text<S: AsRef<str>>(parts: &[S]) -> String {
    let mut text = String::new();
    for part in parts {
        let part = part.as_ref();
        let needs_space = text.chars().last().is_some_and(|c| c.is_ascii())
            && part.chars().next().is_some_and(|c| c.is_ascii());
        if needs_space {
            text.push(' ');
        }
        text.push_str(part);
    }
    text
}

// ============================================================================
// Embedding
// ============================================================================

/// Configuration for embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Normalize embeddings to unit length
    pub normalize: bool,
    /// Batch size for processing
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            batch_size: 32,
        }
    }
}

/// Output from embedding.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    /// The embedding vector
    pub embedding: Vec<f32>,
    /// Number of tokens in input
    pub token_count: usize,
}

// ============================================================================
// Store queries
// ============================================================================

/// Approximate nearest-neighbour query over chunk vectors (cosine).
#[derive(Debug, Clone)]
pub struct VectorQuery {
    /// Query embedding
    pub embedding: Vec<f32>,
    /// Maximum results to return
    pub limit: usize,
}

/// Exact range query for the chunks around a position on one page.
///
/// Matches chunks of `book_id` on `page_number` with
/// `start_pos >= start_min` and `end_pos <= end_max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborQuery {
    pub book_id: String,
    pub page_number: u32,
    pub start_min: u32,
    pub end_max: u32,
}

impl NeighborQuery {
    /// Whether a chunk falls inside this window.
    #[must_use]
    pub fn matches(&self, chunk: &Chunk) -> bool {
        chunk.book_id == self.book_id
            && chunk.page_number == self.page_number
            && chunk.start_pos >= self.start_min
            && chunk.end_pos <= self.end_max
    }
}

/// A chunk returned by a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query, higher is closer
    pub similarity: f32,
}

/// Chunk store statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_books: u64,
    pub total_chunks: u64,
    /// Whether the vector index exists
    pub index_ready: bool,
}

// ============================================================================
// Search requests
// ============================================================================

/// Parameters of one retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Restrict results to one book
    #[serde(default)]
    pub book_id: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub use_rerank: bool,
    #[serde(default = "default_deep_search")]
    pub deep_search: bool,
    /// Sentences of context on each side of a hit
    #[serde(default = "default_expand_window")]
    pub expand_window: u32,
    /// Collapse expansion output into one deduplicated blob
    #[serde(default)]
    pub flatten: bool,
}

fn default_top_k() -> usize {
    5
}

fn default_deep_search() -> bool {
    true
}

fn default_expand_window() -> u32 {
    1
}

impl SearchRequest {
    /// A request with the service defaults.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            book_id: None,
            top_k: default_top_k(),
            use_rerank: false,
            deep_search: default_deep_search(),
            expand_window: default_expand_window(),
            flatten: false,
        }
    }
}

/// A ranked chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub book_id: String,
    pub start_pos: u32,
    pub end_pos: u32,
    pub page_number: u32,
    pub text: String,
    pub similarity: f32,
    pub rerank_score: Option<f32>,
}

impl SearchHit {
    /// Build a hit from a similarity-search result.
    #[must_use]
    pub fn from_scored(scored: ScoredChunk) -> Self {
        let ScoredChunk { chunk, similarity } = scored;
        Self {
            chunk_id: chunk.chunk_id,
            book_id: chunk.book_id,
            start_pos: chunk.start_pos,
            end_pos: chunk.end_pos,
            page_number: chunk.page_number,
            text: chunk.text,
            similarity,
            rerank_score: None,
        }
    }

    /// The score the hit is currently ranked by.
    #[must_use]
    pub fn rank_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.similarity)
    }
}

/// Context reconstructed around one hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// The hit this passage was expanded from
    pub chunk_id: String,
    pub book_id: String,
    pub page_number: u32,
    pub start_pos: u32,
    pub end_pos: u32,
    /// Lower bound used for the neighbour query
    pub window_start: u32,
    /// Upper bound used for the neighbour query
    pub window_end: u32,
    /// Chunks whose text made it into `text`, in page order
    pub merged_chunk_ids: Vec<String>,
    pub text: String,
}

/// Output of context expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "data", rename_all = "snake_case")]
pub enum Expansion {
    /// One passage per hit, in rank order
    Passages(Vec<Passage>),
    /// Every distinct chunk text joined into one blob
    Flattened(String),
}

/// Result of one retrieval: never both shapes at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum SearchResponse {
    Hits(Vec<SearchHit>),
    Expanded(Expansion),
}
