//! Retrieval engine.
//!
//! One request runs to completion through these steps:
//!
//! 1. validate the request
//! 2. embed the query
//! 3. fetch `oversample × top_k` nearest chunks, then apply the book filter
//! 4. optionally re-sort every candidate by reranker score
//! 5. keep the best `top_k`
//! 6. return them as hits, or expand them into context

use folio_core::{Error, RerankError, Result, SearchHit, SearchRequest, SearchResponse, VectorQuery};
use tracing::{debug, info};

use crate::context::AppContext;
use crate::expand::expand;
use crate::resilience::retry;

/// Executes search requests against an [`AppContext`].
#[derive(Debug, Clone)]
pub struct RetrievalEngine {
    ctx: AppContext,
}

impl RetrievalEngine {
    /// Create a new engine.
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// The shared collaborators.
    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Run one search request.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.validate(request)?;
        debug!(
            "Search: {:?} (book: {:?}, top_k: {}, rerank: {}, deep: {})",
            request.query, request.book_id, request.top_k, request.use_rerank, request.deep_search
        );

        let embedding = self.embed_query(&request.query).await?;
        let mut hits = self
            .candidates(embedding, request.book_id.as_deref(), request.top_k)
            .await?;

        if request.use_rerank {
            hits = self.rerank(&request.query, hits).await?;
        }
        hits.truncate(request.top_k);

        info!("Search {:?} matched {} chunks", request.query, hits.len());

        if !request.deep_search {
            return Ok(SearchResponse::Hits(hits));
        }

        let expansion = expand(&self.ctx, &hits, request.expand_window, request.flatten).await?;
        Ok(SearchResponse::Expanded(expansion))
    }

    /// Reject malformed requests before any external call.
    pub fn validate(&self, request: &SearchRequest) -> Result<()> {
        if request.query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".to_string()));
        }
        if request.top_k < 1 {
            return Err(Error::Validation("top_k must be at least 1".to_string()));
        }
        let max_top_k = self.ctx.settings.max_top_k;
        if request.top_k > max_top_k {
            return Err(Error::Validation(format!(
                "top_k must be at most {max_top_k}, got {}",
                request.top_k
            )));
        }
        if request.book_id.as_deref().is_some_and(str::is_empty) {
            return Err(Error::Validation("book_id must not be empty".to_string()));
        }
        Ok(())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embedder = &self.ctx.embedder;
        let config = &self.ctx.settings.embedding;

        let output = retry(
            &self.ctx.settings.retry,
            "query embedding",
            self.ctx.settings.timeout,
            || async move { embedder.embed_query(query, config).await.map_err(Error::from) },
        )
        .await?;

        Ok(output.embedding)
    }

    /// Nearest chunks, post-filtered by book, best first.
    async fn candidates(
        &self,
        embedding: Vec<f32>,
        book_id: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let store = &self.ctx.store;
        let limit = top_k.saturating_mul(self.ctx.settings.oversample.max(1));

        let scored = retry(
            &self.ctx.settings.retry,
            "vector search",
            self.ctx.settings.timeout,
            || {
                let query = VectorQuery {
                    embedding: embedding.clone(),
                    limit,
                };
                async move { store.search(query).await.map_err(Error::from) }
            },
        )
        .await?;

        let fetched = scored.len();
        let mut hits: Vec<SearchHit> = scored
            .into_iter()
            .filter(|s| book_id.is_none_or(|id| s.chunk.book_id == id))
            .map(SearchHit::from_scored)
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        debug!(
            "Vector search returned {} chunks, {} after book filter",
            fetched,
            hits.len()
        );
        Ok(hits)
    }

    /// Re-sort every candidate by reranker score, descending.
    ///
    /// The sort is stable, so equal scores keep their similarity order.
    async fn rerank(&self, query: &str, mut hits: Vec<SearchHit>) -> Result<Vec<SearchHit>> {
        let reranker = self
            .ctx
            .reranker
            .as_ref()
            .ok_or(RerankError::NotConfigured)?;
        if hits.is_empty() {
            return Ok(hits);
        }

        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        let texts = texts.as_slice();
        let scores = retry(
            &self.ctx.settings.retry,
            "rerank",
            self.ctx.settings.timeout,
            || async move { reranker.score(query, texts).await.map_err(Error::from) },
        )
        .await?;

        if scores.len() != hits.len() {
            return Err(RerankError::ScoreCount {
                expected: hits.len(),
                actual: scores.len(),
            }
            .into());
        }

        for (hit, score) in hits.iter_mut().zip(scores) {
            hit.rerank_score = Some(score);
        }
        hits.sort_by(|a, b| b.rank_score().total_cmp(&a.rank_score()));

        debug!("Reranked {} candidates with {}", hits.len(), reranker.model_name());
        Ok(hits)
    }
}
