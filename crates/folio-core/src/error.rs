//! Error types for folio.

use std::time::Duration;
use thiserror::Error;

/// Main error type for folio operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Query or chunk text could not be vectorized
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    /// Chunk store unreachable or query rejected
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Pairwise relevance scoring failed
    #[error("rerank error: {0}")]
    Rerank(#[from] RerankError),

    /// Document extraction failed (ingestion only)
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractError),

    /// Malformed request
    #[error("validation error: {0}")]
    Validation(String),

    /// An external call did not complete in time
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same call may succeed.
    ///
    /// Only network-ish failures qualify: an unreachable store, a transport
    /// failure talking to a model server, or a timeout. Validation and model
    /// errors are permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store(e) => e.is_transient(),
            Error::Embedding(EmbedError::Transport(_)) => true,
            Error::Rerank(RerankError::Transport(_)) => true,
            Error::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Document extraction errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extraction failed: {0}")]
    Failed(String),
}

/// Embedding errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("embedding service unreachable: {0}")]
    Transport(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Reranking errors.
#[derive(Error, Debug)]
pub enum RerankError {
    #[error("no reranker configured")]
    NotConfigured,

    #[error("rerank model error: {0}")]
    Model(String),

    #[error("rerank service unreachable: {0}")]
    Transport(String),

    #[error("reranker returned {actual} scores for {expected} candidates")]
    ScoreCount { expected: usize, actual: usize },
}

/// Chunk store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store initialization failed: {0}")]
    Init(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Connection-level failures are worth retrying; everything else is not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Init(_))
    }
}

/// Result type alias for folio operations.
pub type Result<T> = std::result::Result<T, Error>;
