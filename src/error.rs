use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

/// persistence or query failure in the reading store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored reading has an invalid timestamp: {0}")]
    CorruptTimestamp(i64),
    #[error("store task failed: {0}")]
    Task(String),
    #[error("unsupported store url: {0}")]
    UnsupportedUrl(String),
}

/// per-request failure surfaced by the http layer
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// malformed or out-of-range input
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Store(e) = &self {
            tracing::error!(error = %e, "store request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(StoreError::Task("join".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
