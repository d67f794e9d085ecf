//! Errors surfaced by JWT signing/verification and the auth extractors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Mirrors the original implementation's `Unauthorized` exception family:
/// every variant maps to a 401 except `SigningDisabled`, which is a 503
/// surfaced only from `/token` when no signing key is configured.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("topic not permitted: {0}")]
    TopicNotPermitted(String),

    #[error("token signing is disabled (no signing key configured)")]
    SigningDisabled,

    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Unauthorized(_)
            | AuthError::TokenExpired
            | AuthError::InvalidToken(_)
            | AuthError::Jwt(_) => StatusCode::UNAUTHORIZED,
            AuthError::TopicNotPermitted(_) => StatusCode::FORBIDDEN,
            AuthError::SigningDisabled => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
