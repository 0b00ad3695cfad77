//! Ingestion pipeline: PDF → pages → sentences → chunks → vectors → store.

use folio_core::{
    Book, Chunk, ChunkStore, EmbedError, EmbeddingConfig, Error, Result, StoreError,
};
use folio_embed::EmbedderPool;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chunker::SentenceChunker;
use crate::pdf::{PageText, PdfPageExtractor};
use crate::sentence::SentenceSplitter;

/// Chunks written per store call.
const INSERT_BATCH: usize = 256;

/// Summary of one ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub book_id: String,
    /// Pages with extractable text
    pub pages: usize,
    pub sentences: usize,
    pub chunks: usize,
}

/// Writes one book at a time into a chunk store.
pub struct Ingestor {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<EmbedderPool>,
    extractor: PdfPageExtractor,
    splitter: SentenceSplitter,
    chunker: SentenceChunker,
    embedding_config: EmbeddingConfig,
}

impl Ingestor {
    /// Create an ingestor with the default 3-sentence chunker.
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<EmbedderPool>) -> Self {
        Self {
            store,
            embedder,
            extractor: PdfPageExtractor::new(),
            splitter: SentenceSplitter::new(),
            chunker: SentenceChunker::default(),
            embedding_config: EmbeddingConfig::default(),
        }
    }

    /// Use a specific embedding configuration.
    #[must_use]
    pub fn with_embedding_config(mut self, config: EmbeddingConfig) -> Self {
        self.embedding_config = config;
        self
    }

    /// Extract, chunk, embed and store a PDF.
    pub async fn ingest_pdf(&self, path: &Path, book: Book) -> Result<IngestReport> {
        validate_book(&book)?;
        self.ensure_new(&book.book_id).await?;

        info!("Ingesting {:?} as {}", path, book.book_id);
        let pages = self.extractor.extract(path).await?;
        self.ingest_pages(book, pages).await
    }

    /// Chunk, embed and store already-extracted pages.
    pub async fn ingest_pages(&self, book: Book, pages: Vec<PageText>) -> Result<IngestReport> {
        validate_book(&book)?;
        self.ensure_new(&book.book_id).await?;

        if self.embedder.dimension() != self.store.dimension() {
            return Err(EmbedError::DimensionMismatch {
                expected: self.store.dimension(),
                actual: self.embedder.dimension(),
            }
            .into());
        }

        let mut report = IngestReport {
            book_id: book.book_id.clone(),
            pages: 0,
            sentences: 0,
            chunks: 0,
        };

        let mut chunks: Vec<Chunk> = Vec::new();
        for page in &pages {
            let sentences = self.splitter.split(&page.text);
            if sentences.is_empty() {
                debug!("Page {} has no text", page.page_number);
                continue;
            }
            report.pages += 1;
            report.sentences += sentences.len();
            chunks.extend(
                self.chunker
                    .chunk_page(&book.book_id, page.page_number, &sentences),
            );
        }

        if chunks.is_empty() {
            warn!("{} produced no chunks", book.book_id);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let outputs = self
            .embedder
            .embed_all(&texts, &self.embedding_config)
            .await?;

        let expected = self.store.dimension();
        let chunks: Vec<Chunk> = chunks
            .into_iter()
            .zip(outputs)
            .map(|(chunk, output)| {
                if output.embedding.len() == expected {
                    Ok(chunk.with_vector(output.embedding))
                } else {
                    Err(EmbedError::DimensionMismatch {
                        expected,
                        actual: output.embedding.len(),
                    })
                }
            })
            .collect::<std::result::Result<_, _>>()?;

        self.store.upsert_book(&book).await?;
        for batch in chunks.chunks(INSERT_BATCH) {
            self.store.insert_chunks(batch).await?;
        }

        report.chunks = chunks.len();
        info!(
            "Ingested {}: {} pages, {} sentences, {} chunks",
            report.book_id, report.pages, report.sentences, report.chunks
        );
        Ok(report)
    }

    async fn ensure_new(&self, book_id: &str) -> Result<()> {
        if self.store.get_book(book_id).await?.is_some() {
            return Err(StoreError::Conflict(format!("book {book_id} is already ingested")).into());
        }
        Ok(())
    }
}

/// Book ids become part of every chunk id and of store filters.
fn validate_book(book: &Book) -> Result<()> {
    if book.book_id.is_empty() {
        return Err(Error::Validation("book_id must not be empty".to_string()));
    }
    if book.book_id.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!(
            "book_id must not contain whitespace: {:?}",
            book.book_id
        )));
    }
    Ok(())
}
