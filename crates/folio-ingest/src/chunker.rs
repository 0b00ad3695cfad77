//! Fixed sentence-count chunking.

use folio_core::{Chunk, SENTENCES_PER_CHUNK, join_text};

/// Groups consecutive sentences of a page into chunks.
///
/// Sentence offsets are 1-based: the chunk covering sentences `i..i + n` of a
/// page (0-based `i`) gets `start_pos = i + 1` and `end_pos = start_pos + n`,
/// including a short final chunk.
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    sentences_per_chunk: usize,
}

impl SentenceChunker {
    /// Create a chunker grouping `sentences_per_chunk` sentences.
    #[must_use]
    pub fn new(sentences_per_chunk: usize) -> Self {
        Self {
            sentences_per_chunk: sentences_per_chunk.max(1),
        }
    }

    /// Sentences per chunk.
    pub fn sentences_per_chunk(&self) -> usize {
        self.sentences_per_chunk
    }

    /// Chunk the sentences of one page.
    pub fn chunk_page(&self, book_id: &str, page_number: u32, sentences: &[String]) -> Vec<Chunk> {
        let span = self.sentences_per_chunk as u32;

        sentences
            .chunks(self.sentences_per_chunk)
            .enumerate()
            .map(|(n, group)| {
                let start_pos = n as u32 * span + 1;
                let mut chunk = Chunk::new(book_id, page_number, start_pos, join_text(group));
                chunk.end_pos = start_pos + span;
                chunk
            })
            .collect()
    }
}

impl Default for SentenceChunker {
    fn default() -> Self {
        Self::new(SENTENCES_PER_CHUNK as usize)
    }
}
