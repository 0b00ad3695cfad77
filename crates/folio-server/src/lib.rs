//! HTTP boundary for folio.
//!
//! - `POST /search`: JSON [`folio_core::SearchRequest`] in, JSON array out
//! - `GET /health`: `{"status": "ok"}`
//!
//! Errors are returned as `{"detail": "..."}` with 422 for invalid
//! requests, 504 for timeouts and 500 for everything else.

pub mod error;
pub mod routes;

pub use error::{ApiError, ErrorBody};
pub use routes::{FlatText, SearchBody, router};

use folio_query::RetrievalEngine;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Serve the router on `addr` until `shutdown` resolves.
pub async fn serve(
    engine: Arc<RetrievalEngine>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server stopped");
    Ok(())
}
