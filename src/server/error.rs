//! Error responses returned at the HTTP boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::registry::RegistryError;
use super::storage::StorageError;
use super::tokens::TokenError;
use super::users::UserStoreError;

/// Every failure a route can report.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Failure inside the server that the caller cannot act on.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<UserStoreError> for ApiError {
    fn from(e: UserStoreError) -> Self {
        match e {
            UserStoreError::UsernameTaken(_) => ApiError::Conflict(e.to_string()),
            UserStoreError::InvalidCredentials => ApiError::Unauthorized(e.to_string()),
            UserStoreError::EmptyCredentials => ApiError::BadRequest(e.to_string()),
            UserStoreError::Hashing(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::InvalidToken | TokenError::Expired => ApiError::Unauthorized(e.to_string()),
            TokenError::Signing => ApiError::Internal(e.to_string()),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.clone()),
            ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.clone()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.clone()),
            ApiError::Registry(e) => {
                let (status, code) = match e {
                    RegistryError::DocumentNotFound(_) => {
                        (StatusCode::NOT_FOUND, "document_not_found")
                    }
                    RegistryError::UserNotFound(_) => (StatusCode::NOT_FOUND, "user_not_found"),
                    RegistryError::InvalidTarget { .. } => {
                        (StatusCode::BAD_REQUEST, "invalid_target")
                    }
                    RegistryError::InvalidOwner(_) => (StatusCode::FORBIDDEN, "invalid_owner"),
                };
                (status, code, e.to_string())
            }
            ApiError::Storage(e) => {
                tracing::error!("Storage failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_failure",
                    "Storage operation failed".to_string(),
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!("Internal failure: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = self.parts();
        (status, Json(ErrorResponse { error, message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentId, UserId};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ApiError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (
                RegistryError::DocumentNotFound(DocumentId::new(1)).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                RegistryError::UserNotFound(UserId::new(1)).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                RegistryError::InvalidTarget {
                    user: UserId::new(1),
                    reason: "x",
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                RegistryError::InvalidOwner(UserId::new(1)).into(),
                StatusCode::FORBIDDEN,
            ),
            (
                UserStoreError::UsernameTaken("a".into()).into(),
                StatusCode::CONFLICT,
            ),
            (
                UserStoreError::Hashing("x".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (TokenError::Expired.into(), StatusCode::UNAUTHORIZED),
            (TokenError::Signing.into(), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn test_storage_detail_not_leaked() {
        let error = ApiError::from(StorageError::Io(
            "/secret/path/state.json".into(),
            std::io::Error::other("disk full"),
        ));

        let (status, code, message) = error.parts();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "storage_failure");
        assert!(!message.contains("/secret/path"));
    }

    #[test]
    fn test_internal_detail_not_leaked() {
        let error = ApiError::from(UserStoreError::Hashing("salt too short".into()));

        let (status, code, message) = error.parts();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "internal_error");
        assert!(!message.contains("salt"));
    }
}
