//! Context expansion ("deep search").
//!
//! Every hit is widened to the chunks around it on the same page of the same
//! book. Texts are deduplicated across all hits, so a chunk shared by two
//! overlapping windows is emitted once, by the higher-ranked hit.

use folio_core::{Chunk, Error, Expansion, NeighborQuery, Passage, Result, SearchHit, join_text};
use futures::future::try_join_all;
use std::collections::HashSet;
use tracing::debug;

use crate::context::AppContext;
use crate::resilience::retry;

/// Separator between distinct texts in flattened output.
pub const FLATTEN_SEPARATOR: &str = "\n\r";

/// Neighbour query for one hit: `[max(1, start - w), end + w]`.
#[must_use]
pub fn window(hit: &SearchHit, expand_window: u32) -> NeighborQuery {
    NeighborQuery {
        book_id: hit.book_id.clone(),
        page_number: hit.page_number,
        start_min: hit.start_pos.saturating_sub(expand_window).max(1),
        end_max: hit.end_pos.saturating_add(expand_window),
    }
}

/// Expand ranked hits into passages, or into one flattened blob.
///
/// Neighbourhoods are fetched concurrently and assembled in hit order. Any
/// failed fetch fails the whole expansion. No hits expand to no passages,
/// in either mode.
pub async fn expand(
    ctx: &AppContext,
    hits: &[SearchHit],
    expand_window: u32,
    flatten: bool,
) -> Result<Expansion> {
    if hits.is_empty() {
        return Ok(Expansion::Passages(Vec::new()));
    }

    let windows: Vec<NeighborQuery> = hits.iter().map(|hit| window(hit, expand_window)).collect();

    let neighborhoods = try_join_all(windows.iter().map(|query| fetch(ctx, query))).await?;
    debug!(
        "Fetched {} neighbourhoods ({} chunks)",
        neighborhoods.len(),
        neighborhoods.iter().map(Vec::len).sum::<usize>()
    );

    if flatten {
        Ok(Expansion::Flattened(flatten_texts(&neighborhoods)))
    } else {
        Ok(Expansion::Passages(assemble_passages(
            hits,
            &windows,
            &neighborhoods,
        )))
    }
}

async fn fetch(ctx: &AppContext, query: &NeighborQuery) -> Result<Vec<Chunk>> {
    let store = &ctx.store;
    retry(
        &ctx.settings.retry,
        "neighbour query",
        ctx.settings.timeout,
        || async move { store.neighbors(query).await.map_err(Error::from) },
    )
    .await
}

/// One passage per hit; texts already emitted by an earlier passage are
/// skipped and passages left empty are dropped.
fn assemble_passages(
    hits: &[SearchHit],
    windows: &[NeighborQuery],
    neighborhoods: &[Vec<Chunk>],
) -> Vec<Passage> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut passages = Vec::with_capacity(hits.len());

    for ((hit, window), chunks) in hits.iter().zip(windows).zip(neighborhoods) {
        let fresh: Vec<&Chunk> = chunks
            .iter()
            .filter(|chunk| seen.insert(chunk.text.as_str()))
            .collect();

        if fresh.is_empty() {
            debug!("Dropping passage for {}: nothing new", hit.chunk_id);
            continue;
        }

        let texts: Vec<&str> = fresh.iter().map(|c| c.text.as_str()).collect();
        passages.push(Passage {
            chunk_id: hit.chunk_id.clone(),
            book_id: hit.book_id.clone(),
            page_number: hit.page_number,
            start_pos: hit.start_pos,
            end_pos: hit.end_pos,
            window_start: window.start_min,
            window_end: window.end_max,
            merged_chunk_ids: fresh.iter().map(|c| c.chunk_id.clone()).collect(),
            text: join_text(&texts),
        });
    }

    passages
}

/// Every distinct text in first-seen order.
fn flatten_texts(neighborhoods: &[Vec<Chunk>]) -> String {
    let mut seen: HashSet<&str> = HashSet::new();
    let distinct: Vec<&str> = neighborhoods
        .iter()
        .flatten()
        .map(|chunk| chunk.text.as_str())
        .filter(|text| seen.insert(*text))
        .collect();
    distinct.join(FLATTEN_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{Book, ChunkStore, ScoredChunk};
    use folio_embed::NoopEmbedder;
    use folio_store::MemoryStore;
    use std::sync::Arc;

    const TEST_DIM: usize = 4;

    fn hit(book_id: &str, page: u32, start: u32, text: &str) -> SearchHit {
        SearchHit::from_scored(ScoredChunk {
            chunk: Chunk::new(book_id, page, start, text),
            similarity: 0.9,
        })
    }

    /// A page of chunks at start positions 1, 4, 7, ...
    fn page(book_id: &str, page: u32, texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                Chunk::new(book_id, page, i as u32 * 3 + 1, *text).with_vector(vec![1.0; TEST_DIM])
            })
            .collect()
    }

    async fn context(chunks: Vec<Chunk>) -> AppContext {
        let store = Arc::new(MemoryStore::new(TEST_DIM));
        store.init().await.unwrap();
        let mut books: Vec<&str> = chunks.iter().map(|c| c.book_id.as_str()).collect();
        books.dedup();
        for book_id in books {
            store
                .upsert_book(&Book {
                    book_id: book_id.to_string(),
                    title: String::new(),
                    author: String::new(),
                })
                .await
                .unwrap();
        }
        store.insert_chunks(&chunks).await.unwrap();
        AppContext::new(store, Arc::new(NoopEmbedder::with_dimension(TEST_DIM)))
    }

    #[test]
    fn test_window_bounds() {
        let mut h = hit("b1", 4, 6, "t");
        h.end_pos = 9;

        let query = window(&h, 1);
        assert_eq!(query.book_id, "b1");
        assert_eq!(query.page_number, 4);
        assert_eq!(query.start_min, 5);
        assert_eq!(query.end_max, 10);
    }

    #[test]
    fn test_window_clamps_at_one() {
        let query = window(&hit("b1", 1, 1, "t"), 3);
        assert_eq!(query.start_min, 1);
        assert_eq!(query.end_max, 7);

        let query = window(&hit("b1", 1, 4, "t"), 10);
        assert_eq!(query.start_min, 1);
    }

    #[tokio::test]
    async fn test_window_of_three_merges_adjacent_chunks() {
        let ctx = context(page("b1", 2, &["A.", "B.", "C.", "D."])).await;

        let expansion = expand(&ctx, &[hit("b1", 2, 4, "B.")], 3, false)
            .await
            .unwrap();

        let Expansion::Passages(passages) = expansion else {
            panic!("expected passages");
        };
        assert_eq!(passages.len(), 1);
        let passage = &passages[0];
        assert_eq!(passage.chunk_id, "b1_chunk_2_4");
        assert_eq!((passage.window_start, passage.window_end), (1, 10));
        assert_eq!(
            passage.merged_chunk_ids,
            ["b1_chunk_2_1", "b1_chunk_2_4", "b1_chunk_2_7"]
        );
        assert_eq!(passage.text, "A. B. C.");
    }

    #[tokio::test]
    async fn test_window_of_one_keeps_only_the_hit() {
        // Neighbours are 3 sentences away, so a window of 1 cannot reach them
        let ctx = context(page("b1", 1, &["A.", "B.", "C."])).await;

        let Expansion::Passages(passages) = expand(&ctx, &[hit("b1", 1, 4, "B.")], 1, false)
            .await
            .unwrap()
        else {
            panic!("expected passages");
        };
        assert_eq!(passages[0].merged_chunk_ids, ["b1_chunk_1_4"]);
        assert_eq!(passages[0].text, "B.");
    }

    #[tokio::test]
    async fn test_expansion_stays_on_page_and_book() {
        let mut chunks = page("b1", 1, &["A.", "B."]);
        chunks.extend(page("b1", 2, &["Other page."]));
        chunks.extend(page("b2", 1, &["Other book."]));
        let ctx = context(chunks).await;

        let Expansion::Passages(passages) = expand(&ctx, &[hit("b1", 1, 1, "A.")], 5, false)
            .await
            .unwrap()
        else {
            panic!("expected passages");
        };
        assert_eq!(passages[0].merged_chunk_ids, ["b1_chunk_1_1", "b1_chunk_1_4"]);
    }

    #[tokio::test]
    async fn test_overlapping_windows_are_deduplicated() {
        let ctx = context(page("b1", 1, &["A.", "B.", "C.", "D."])).await;
        let hits = [hit("b1", 1, 4, "B."), hit("b1", 1, 7, "C."), hit("b1", 1, 1, "A.")];

        let Expansion::Passages(passages) = expand(&ctx, &hits, 3, false).await.unwrap() else {
            panic!("expected passages");
        };

        // The third hit's window is fully covered by the first two
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].text, "A. B. C.");
        assert_eq!(passages[1].chunk_id, "b1_chunk_1_7");
        assert_eq!(passages[1].merged_chunk_ids, ["b1_chunk_1_10"]);
        assert_eq!(passages[1].text, "D.");

        let mut merged = HashSet::new();
        for id in passages.iter().flat_map(|p| &p.merged_chunk_ids) {
            assert!(merged.insert(id), "{id} merged twice");
        }
    }

    #[tokio::test]
    async fn test_identical_texts_on_different_pages_emitted_once() {
        let mut chunks = page("b1", 1, &["Warning: disconnect power."]);
        chunks.extend(page("b1", 9, &["Warning: disconnect power."]));
        let ctx = context(chunks).await;
        let hits = [
            hit("b1", 1, 1, "Warning: disconnect power."),
            hit("b1", 9, 1, "Warning: disconnect power."),
        ];

        let Expansion::Passages(passages) = expand(&ctx, &hits, 1, false).await.unwrap() else {
            panic!("expected passages");
        };
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].page_number, 1);
    }

    #[tokio::test]
    async fn test_flatten_joins_distinct_texts_in_order() {
        let ctx = context(page("b1", 1, &["甲。", "乙。", "丙。"])).await;
        let hits = [hit("b1", 1, 7, "丙。"), hit("b1", 1, 1, "甲。")];

        let expansion = expand(&ctx, &hits, 3, true).await.unwrap();
        assert_eq!(
            expansion,
            Expansion::Flattened("乙。\n\r丙。\n\r甲。".to_string())
        );

        // Same request, same blob
        let again = expand(&ctx, &hits, 3, true).await.unwrap();
        assert_eq!(again, expansion);
    }

    #[tokio::test]
    async fn test_no_hits_expand_to_nothing() {
        let ctx = context(page("b1", 1, &["A."])).await;
        assert_eq!(
            expand(&ctx, &[], 1, false).await.unwrap(),
            Expansion::Passages(vec![])
        );
        assert_eq!(
            expand(&ctx, &[], 1, true).await.unwrap(),
            Expansion::Passages(vec![])
        );
    }
}
