//! The error taxonomy of the HTTP layer and its mapping onto status codes.
//!
//! Every body has the shape `{"detail": ...}`: a string for most errors and a
//! list of `{field, message}` objects for validation failures.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{
    credentials::CredentialError, intake::IntakeError, repository::RepositoryError,
    storage::StorageError, validation::ValidationErrors,
};

pub const INVALID_CREDENTIALS: &str = "Incorrect email or password";
pub const UNAUTHORIZED: &str = "Could not validate credentials";
const INTERNAL: &str = "Internal server error";
const UNAVAILABLE: &str = "Service temporarily unavailable";

/// ApiError
///
/// The primary error type returned by handlers and extractors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// Missing, malformed, forged or expired token, or a token for an unknown user.
    #[error("unauthorized")]
    Unauthorized,

    /// Login failure. Unknown email and wrong password are indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(&'static str),

    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error("dependency unavailable")]
    DependencyUnavailable,

    /// Logged in full, answered with a generic message.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Intake(IntakeError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Validation(_) | ApiError::Intake(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ApiError::Validation(errors) => json!({ "detail": errors }),
            ApiError::Unauthorized => json!({ "detail": UNAUTHORIZED }),
            ApiError::InvalidCredentials => json!({ "detail": INVALID_CREDENTIALS }),
            ApiError::Forbidden(reason) => json!({ "detail": reason }),
            ApiError::NotFound(entity) => json!({ "detail": format!("{entity} not found") }),
            ApiError::Conflict(reason) => json!({ "detail": reason }),
            ApiError::Intake(IntakeError::Storage(e)) => {
                tracing::error!("file store failure during intake: {:?}", e);
                json!({ "detail": INTERNAL })
            }
            ApiError::Intake(e) => json!({ "detail": e.to_string() }),
            ApiError::DependencyUnavailable => json!({ "detail": UNAVAILABLE }),
            ApiError::Internal(message) => {
                tracing::error!("internal error: {}", message);
                json!({ "detail": INTERNAL })
            }
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Conflict(what) => ApiError::Conflict(what),
            RepositoryError::MissingReference(entity) => ApiError::NotFound(entity),
            RepositoryError::Unavailable(reason) => {
                tracing::error!("persistence unavailable: {}", reason);
                ApiError::DependencyUnavailable
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::InvalidToken => ApiError::Unauthorized,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {e}"))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
