//! Query-time retrieval for folio.
//!
//! [`RetrievalEngine`] turns a [`folio_core::SearchRequest`] into a
//! [`folio_core::SearchResponse`] using the collaborators held by an
//! [`AppContext`].

pub mod context;
pub mod engine;
pub mod expand;
pub mod resilience;

pub use context::{AppContext, SearchSettings};
pub use engine::RetrievalEngine;
pub use expand::{FLATTEN_SEPARATOR, expand, window};
pub use resilience::{RetryPolicy, retry, with_timeout};
