use crate::store::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("stock not found")]
    NotFound,
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(reason) => ApiError::BadRequest(reason),
            StoreError::NotFound => ApiError::NotFound,
            other => {
                error!(error = %other, "Store operation failed");
                ApiError::Internal("failed to persist stock".to_string())
            }
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        error!(error = %err, "Blocking store task failed");
        ApiError::Internal("internal error".to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_store_errors_map_to_status() {
        let cases = [
            (
                ApiError::from(StoreError::Validation("symbol is required".into())),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::from(StoreError::NotFound), StatusCode::NOT_FOUND),
            (
                ApiError::from(StoreError::Persistence {
                    path: PathBuf::from("/data/index.json"),
                    source: std::io::Error::other("disk full"),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let err = ApiError::from(StoreError::Persistence {
            path: PathBuf::from("/secret/index.json"),
            source: std::io::Error::other("disk full"),
        });
        assert_eq!(err.to_string(), "failed to persist stock");
    }
}
