//! Routes and wire shapes.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post};
use axum::{Json, Router};
use folio_core::{Expansion, Passage, SearchHit, SearchRequest, SearchResponse};
use folio_query::RetrievalEngine;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;

/// Body of a successful `/search` response: always a JSON array.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SearchBody {
    Hits(Vec<SearchHit>),
    Passages(Vec<Passage>),
    /// Single-element array holding the flattened blob
    Flattened([FlatText; 1]),
}

#[derive(Debug, Serialize)]
pub struct FlatText {
    pub text: String,
}

impl From<SearchResponse> for SearchBody {
    fn from(response: SearchResponse) -> Self {
        match response {
            SearchResponse::Hits(hits) => SearchBody::Hits(hits),
            SearchResponse::Expanded(Expansion::Passages(passages)) => {
                SearchBody::Passages(passages)
            }
            SearchResponse::Expanded(Expansion::Flattened(text)) => {
                SearchBody::Flattened([FlatText { text }])
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

/// Build the service router.
pub fn router(engine: Arc<RetrievalEngine>) -> Router {
    Router::new()
        .route("/search", post(search))
        .route("/health", get(health))
        .with_state(engine)
}

async fn search(
    State(engine): State<Arc<RetrievalEngine>>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchBody>, ApiError> {
    let Json(request) = body?;
    debug!("POST /search {:?}", request.query);

    let response = engine.search(&request).await?;
    Ok(Json(response.into()))
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}
