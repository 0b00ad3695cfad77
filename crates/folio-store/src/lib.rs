//! Chunk storage for folio.
//!
//! This crate provides the [`ChunkStore`](folio_core::ChunkStore)
//! implementations:
//!
//! - [`MemoryStore`]: brute-force cosine search over an in-memory map, with
//!   an optional JSON snapshot file for persistence
//! - `LanceStore` (feature `lancedb`): `books` and `chunks` tables in
//!   `LanceDB`, with a cosine IVF-PQ index on the vector column
//!
//! # Example
//!
//! ```rust,ignore
//! use folio_store::MemoryStore;
//! use folio_core::ChunkStore;
//!
//! let store = MemoryStore::open("folio.json", 384).await?;
//! store.init().await?;
//! store.upsert_book(&book).await?;
//! store.insert_chunks(&chunks).await?;
//!
//! let results = store.search(query).await?;
//! ```

pub mod memory;

#[cfg(feature = "lancedb")]
pub mod lance;
#[cfg(feature = "lancedb")]
pub mod schema;

#[cfg(feature = "lancedb")]
pub use lance::LanceStore;
pub use memory::MemoryStore;
