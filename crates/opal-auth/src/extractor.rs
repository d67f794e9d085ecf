//! Axum extractors for the bearer-token auth used by both the admin HTTP
//! routes and the pub/sub websocket upgrade.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::claims::Claims;
use crate::error::AuthError;
use crate::signer::JwtSigner;

#[derive(Clone)]
pub struct AuthState {
    pub signer: Arc<JwtSigner>,
}

impl AuthState {
    pub fn new(signer: Arc<JwtSigner>) -> Self {
        Self { signer }
    }
}

/// Validates a bearer token from the `Authorization` header or, failing
/// that, a `token` query parameter — the latter exists because websocket
/// upgrade requests cannot set arbitrary headers from a browser client.
pub struct BearerAuth(pub Claims);

impl<S> FromRequestParts<S> for BearerAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);

        if !auth_state.signer.is_enabled() {
            return Ok(BearerAuth(Claims::anonymous()));
        }

        let token = extract_token_from_header(parts)
            .or_else(|| extract_token_from_query(parts))
            .ok_or_else(|| AuthError::Unauthorized("missing bearer token".to_string()))?;

        if token.is_empty() {
            return Err(AuthError::Unauthorized("empty bearer token".to_string()));
        }

        let claims = auth_state.signer.verify(&token)?;
        Ok(BearerAuth(claims))
    }
}

pub struct OptionalBearerAuth(pub Option<Claims>);

impl<S> FromRequestParts<S> for OptionalBearerAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let has_header = parts.headers.get(AUTHORIZATION).is_some();
        let has_query = extract_token_from_query(parts).is_some();

        if !has_header && !has_query {
            return Ok(OptionalBearerAuth(None));
        }

        match BearerAuth::from_request_parts(parts, state).await {
            Ok(BearerAuth(claims)) => Ok(OptionalBearerAuth(Some(claims))),
            Err(AuthError::Unauthorized(_)) => Ok(OptionalBearerAuth(None)),
            Err(e) => Err(e),
        }
    }
}

fn extract_token_from_header(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

fn extract_token_from_query(parts: &Parts) -> Option<String> {
    let query = parts.uri.query()?;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=')
            && key == "token"
            && !value.is_empty()
        {
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_token_from_query_finds_token_param() {
        let (parts, _) = http_parts_with_query("foo=bar&token=abc123");
        assert_eq!(extract_token_from_query(&parts), Some("abc123".to_string()));
    }

    #[test]
    fn extract_token_from_query_ignores_other_params() {
        let (parts, _) = http_parts_with_query("foo=bar");
        assert_eq!(extract_token_from_query(&parts), None);
    }

    fn http_parts_with_query(query: &str) -> (Parts, ()) {
        let uri: axum::http::Uri = format!("/ws?{query}").parse().unwrap();
        let request = axum::http::Request::builder()
            .uri(uri)
            .body(())
            .unwrap();
        (request.into_parts().0, ())
    }
}
