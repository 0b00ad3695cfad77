//! Shared state handed to every request.

use folio_core::{ChunkStore, Embedder, EmbeddingConfig, Reranker};
use std::sync::Arc;
use std::time::Duration;

use crate::resilience::RetryPolicy;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// `top_k` used by callers that do not pass one
    pub default_top_k: usize,
    /// Largest accepted `top_k`
    pub max_top_k: usize,
    /// Candidates fetched from the store per requested result
    pub oversample: usize,
    /// Bound on every embedder, store and reranker call
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub embedding: EmbeddingConfig,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 100,
            oversample: 3,
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

/// Collaborators of the retrieval engine, built once at startup.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn ChunkStore>,
    pub embedder: Arc<dyn Embedder>,
    pub reranker: Option<Arc<dyn Reranker>>,
    pub settings: SearchSettings,
}

impl AppContext {
    /// Create a context without a reranker and with default settings.
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            reranker: None,
            settings: SearchSettings::default(),
        }
    }

    /// Attach a reranker.
    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Replace the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: SearchSettings) -> Self {
        self.settings = settings;
        self
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("embedder", &self.embedder.model_name())
            .field(
                "reranker",
                &self.reranker.as_ref().map(|r| r.model_name().to_string()),
            )
            .field("dimension", &self.store.dimension())
            .field("settings", &self.settings)
            .finish()
    }
}
