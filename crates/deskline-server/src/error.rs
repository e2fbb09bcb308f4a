use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use deskline_live::{ConnectionError, MutationError, QueryError};
use deskline_shared::IdentityParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<MutationError> for ServerError {
    fn from(e: MutationError) -> Self {
        match e {
            MutationError::Invalid(r) => ServerError::BadRequest(r),
            MutationError::NotFound(r) => ServerError::NotFound(r),
            MutationError::Rejected(r) => ServerError::Rejected(r),
            MutationError::Unavailable(r) => ServerError::Unavailable(r),
        }
    }
}

impl From<ConnectionError> for ServerError {
    fn from(e: ConnectionError) -> Self {
        ServerError::Unavailable(e.to_string())
    }
}

impl From<QueryError> for ServerError {
    fn from(e: QueryError) -> Self {
        ServerError::Unavailable(e.to_string())
    }
}

impl From<IdentityParseError> for ServerError {
    fn from(e: IdentityParseError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Rejected(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            ServerError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
