//! Builds the store, embedder and reranker selected by the configuration.

use anyhow::{Context, Result};
#[cfg(feature = "candle")]
use folio_embed::{CandleCrossEncoder, CandleEmbedder};
use folio_core::{ChunkStore, Embedder, Reranker};
use folio_embed::{HashEmbedder, HttpEmbedder, HttpReranker};
use folio_query::AppContext;
#[cfg(feature = "lancedb")]
use folio_store::LanceStore;
use folio_store::MemoryStore;
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, EmbeddingProvider, RerankProvider, StoreBackend};

/// Snapshot file of the memory backend, inside the store directory.
const SNAPSHOT_FILE: &str = "folio.json";

/// LanceDB database directory, inside the store directory.
#[cfg(feature = "lancedb")]
const LANCE_DIR: &str = "folio.lance";

/// Open and initialise the configured store.
pub async fn open_store(config: &Config) -> Result<Arc<dyn ChunkStore>> {
    let dir = config.store.dir()?;
    let dimension = config.store.dimension;

    let store: Arc<dyn ChunkStore> = match config.store.backend {
        StoreBackend::Memory => {
            let path = dir.join(SNAPSHOT_FILE);
            info!("Opening memory store at {:?}", path);
            Arc::new(
                MemoryStore::open(path, dimension)
                    .await
                    .context("Failed to open snapshot")?,
            )
        }
        #[cfg(feature = "lancedb")]
        StoreBackend::Lance => {
            let path = dir.join(LANCE_DIR);
            info!("Opening LanceDB store at {:?}", path);
            Arc::new(LanceStore::new(path, dimension))
        }
        #[cfg(not(feature = "lancedb"))]
        StoreBackend::Lance => {
            anyhow::bail!("store backend \"lance\" needs folio built with the lancedb feature")
        }
    };

    store.init().await.context("Failed to initialize store")?;
    Ok(store)
}

/// Create the configured embedder.
pub async fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let section = &config.embedding;
    let dimension = config.store.dimension;

    let embedder: Arc<dyn Embedder> = match section.provider {
        EmbeddingProvider::Hash => Arc::new(HashEmbedder::new(dimension)),
        EmbeddingProvider::Http => {
            let endpoint = section
                .endpoint
                .as_deref()
                .context("embedding.endpoint is required for the http provider")?;
            let model = section.model.clone().unwrap_or_default();
            Arc::new(HttpEmbedder::new(endpoint, model, dimension))
        }
        #[cfg(feature = "candle")]
        EmbeddingProvider::Candle => {
            let model = section
                .model
                .as_deref()
                .unwrap_or(folio_embed::candle::DEFAULT_MODEL_ID);
            let embedder = CandleEmbedder::with_model(model, dimension, crate::config::cache_dir());

            info!("Initializing embedder (this may download the model on first run)...");
            embedder
                .init()
                .await
                .context("Failed to initialize embedder")?;
            Arc::new(embedder)
        }
        #[cfg(not(feature = "candle"))]
        EmbeddingProvider::Candle => {
            anyhow::bail!("embedding provider \"candle\" needs folio built with the candle feature")
        }
    };

    info!(
        "Embedder: {} ({} dimensions)",
        embedder.model_name(),
        embedder.dimension()
    );
    Ok(embedder)
}

/// Create the configured reranker, if any.
pub async fn build_reranker(config: &Config) -> Result<Option<Arc<dyn Reranker>>> {
    let section = &config.rerank;

    let reranker: Arc<dyn Reranker> = match section.provider {
        RerankProvider::None => return Ok(None),
        RerankProvider::Http => {
            let endpoint = section
                .endpoint
                .as_deref()
                .context("rerank.endpoint is required for the http provider")?;
            Arc::new(HttpReranker::new(
                endpoint,
                section.model.clone().unwrap_or_default(),
            ))
        }
        #[cfg(feature = "candle")]
        RerankProvider::Candle => {
            let model = section
                .model
                .as_deref()
                .unwrap_or(folio_embed::cross_encoder::DEFAULT_RERANK_MODEL_ID);
            let reranker = CandleCrossEncoder::with_model(model, crate::config::cache_dir());
            reranker
                .init()
                .await
                .context("Failed to initialize reranker")?;
            Arc::new(reranker)
        }
        #[cfg(not(feature = "candle"))]
        RerankProvider::Candle => {
            anyhow::bail!("rerank provider \"candle\" needs folio built with the candle feature")
        }
    };

    info!("Reranker: {}", reranker.model_name());
    Ok(Some(reranker))
}

/// Everything the query path needs.
pub async fn build_context(config: &Config) -> Result<AppContext> {
    let store = open_store(config).await?;
    let embedder = build_embedder(config).await?;
    ensure_dimensions(store.as_ref(), embedder.as_ref())?;

    let mut ctx = AppContext::new(store, embedder).with_settings(config.search_settings());
    if let Some(reranker) = build_reranker(config).await? {
        ctx = ctx.with_reranker(reranker);
    }
    Ok(ctx)
}

/// The store and the embedder must agree on the vector size.
pub fn ensure_dimensions(store: &dyn ChunkStore, embedder: &dyn Embedder) -> Result<()> {
    if store.dimension() != embedder.dimension() {
        anyhow::bail!(
            "embedder {} produces {}-dimensional vectors but the store expects {}",
            embedder.model_name(),
            embedder.dimension(),
            store.dimension()
        );
    }
    Ok(())
}
