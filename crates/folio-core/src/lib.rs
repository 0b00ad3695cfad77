//! # folio-core
//!
//! Core types and traits for folio, a semantic retrieval service over books.
//!
//! ## Architecture
//!
//! ```text
//! PDF → pages → sentences → Chunk ─┬─ Embedder ─→ ChunkStore
//!                                  │
//! SearchRequest → Embedder → ChunkStore::search → Reranker? → ChunkStore::neighbors?
//!                                                                 ↓
//!                                                          SearchResponse
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Book`] | Document-level record |
//! | [`Chunk`] | Three sentences of a page with their embedding |
//! | [`SearchRequest`] | Parameters of one retrieval |
//! | [`SearchResponse`] | Ranked hits or expanded context |
//!
//! ## Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`Embedder`] | Generate vector embeddings |
//! | [`Reranker`] | Score (query, text) pairs |
//! | [`ChunkStore`] | Store, search and range-query chunks |

pub mod error;
pub mod traits;
pub mod types;

pub use error::{EmbedError, Error, ExtractError, RerankError, Result, StoreError};
pub use traits::*;
pub use types::*;
