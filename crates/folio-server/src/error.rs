//! Mapping of engine errors onto HTTP responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use folio_core::Error;
use serde::Serialize;
use tracing::{error, warn};

/// Error body: `{"detail": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// An error leaving the HTTP boundary.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    /// Status code for an engine error.
    #[must_use]
    pub fn status_for(err: &Error) -> StatusCode {
        match err {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self {
            status: Self::status_for(&err),
            detail: err.to_string(),
        }
    }
}

/// Malformed bodies are validation errors, whatever axum would have chosen.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed ({}): {}", self.status, self.detail);
        } else {
            warn!("Request rejected ({}): {}", self.status, self.detail);
        }
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{EmbedError, RerankError, StoreError};
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::status_for(&Error::Validation("top_k".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::status_for(&Error::Timeout {
                operation: "vector search",
                after: Duration::from_secs(1),
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        for err in [
            Error::Store(StoreError::Unavailable("down".into())),
            Error::Embedding(EmbedError::Transport("reset".into())),
            Error::Rerank(RerankError::NotConfigured),
        ] {
            assert_eq!(ApiError::status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn test_detail_is_error_message() {
        let api: ApiError = Error::Validation("query must not be empty".into()).into();
        assert_eq!(api.detail, "validation error: query must not be empty");
    }
}
