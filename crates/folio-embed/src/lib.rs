//! # folio-embed
//!
//! Embedding and reranking backends for folio.
//!
//! ## Cargo Features
//!
//! - `candle`: local BERT inference with the Candle ML stack
//!   ([`CandleEmbedder`], [`CandleCrossEncoder`]); models are fetched from the
//!   Hugging Face Hub on first use
//! - Without `candle`: hashing, no-op and HTTP backends only
//!
//! ## Default models
//!
//! | Role | Model | Output |
//! |------|-------|--------|
//! | Embedding | `paraphrase-multilingual-MiniLM-L12-v2` | 384-d, normalized |
//! | Reranking | `cross-encoder/ms-marco-MiniLM-L-6-v2` | one logit per pair |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use folio_embed::{EmbedderPool, HttpEmbedder};
//! use folio_core::EmbeddingConfig;
//! use std::sync::Arc;
//!
//! let embedder = HttpEmbedder::new("http://localhost:8080", "minilm", 384);
//! let pool = EmbedderPool::new(Arc::new(embedder), 4);
//!
//! let outputs = pool.embed_all(&texts, &EmbeddingConfig::default()).await?;
//! ```
//!
//! ## Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`HashEmbedder`] | Deterministic bag-of-tokens vectors, no model needed |
//! | [`HttpEmbedder`] | Client for a remote `/embed` endpoint |
//! | [`HttpReranker`] | Client for a remote `/rerank` endpoint |
//! | [`EmbedderPool`] | Batching and semaphore-limited concurrency |
//! | [`NoopEmbedder`] | Zero vectors, for wiring tests |

#[cfg(feature = "candle")]
pub mod candle;
#[cfg(feature = "candle")]
pub mod cross_encoder;
#[cfg(feature = "candle")]
mod hub;

#[cfg(feature = "candle")]
pub use candle::CandleEmbedder;
#[cfg(feature = "candle")]
pub use cross_encoder::CandleCrossEncoder;

pub mod hash;
pub mod http;
pub mod noop;
pub mod pool;

pub use hash::HashEmbedder;
pub use http::{HttpEmbedder, HttpReranker};
pub use noop::NoopEmbedder;
pub use pool::EmbedderPool;
