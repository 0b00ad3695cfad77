//! Offline ingestion for folio.
//!
//! ```text
//! PDF ──lopdf──▶ PageText ──SentenceSplitter──▶ sentences
//!     ──SentenceChunker(3)──▶ Chunk ──EmbedderPool──▶ ChunkStore
//! ```
//!
//! Every page is chunked independently, so a chunk never spans two pages.

pub mod chunker;
pub mod pdf;
pub mod pipeline;
pub mod sentence;

pub use chunker::SentenceChunker;
pub use pdf::{PageText, PdfPageExtractor};
pub use pipeline::{IngestReport, Ingestor};
pub use sentence::SentenceSplitter;
