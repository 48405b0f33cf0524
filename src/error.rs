// =============================================================================
// Crate-level error type shared by the store, projector, and ingestion layers.
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors that can cross a module boundary inside this crate.
///
/// Task-local failures (a single bad HTTP response, one malformed log) are
/// handled and logged where they occur and never reach this type; `Error`
/// is reserved for failures a caller needs to branch on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("chain RPC error: {0}")]
    Chain(String),

    #[error("exchange request error: {0}")]
    Exchange(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}

/// Lets handlers simply return `Result<Json<T>, Error>` and have it become
/// the `{error}` body shape required by the query API.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            Error::InvalidParameter(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Error::Database(e) => {
                tracing::error!(error = %e, "database error surfaced to API boundary");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            Error::Chain(e) => {
                tracing::error!(error = %e, "chain error surfaced to API boundary");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            Error::Exchange(e) => {
                tracing::error!(error = %e, "exchange error surfaced to API boundary");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            Error::Internal(e) => {
                tracing::error!(error = %e, "internal error surfaced to API boundary");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
