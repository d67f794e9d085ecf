//! HTTP route handlers (spec.md §6). `/ws` is not here — it reuses
//! `opal_transport::server::ws_handler` directly in `server.rs`'s router.

use std::collections::HashMap;
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use opal_auth::BearerAuth;
use opal_core::{DataUpdate, ServerDataSourceConfig, Topic};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("policy repository not ready")]
    NotReady,
    #[error("requested base_hash not found")]
    BaseNotFound,
    #[error("webhook not configured")]
    WebhookNotConfigured,
    #[error(transparent)]
    Auth(#[from] opal_auth::AuthError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let ServerError::Auth(e) = self {
            return e.into_response();
        }
        let status = match &self {
            ServerError::NotReady | ServerError::WebhookNotConfigured => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServerError::BaseNotFound => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Auth(_) => unreachable!(),
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn healthcheck() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub id: String,
    #[serde(default)]
    pub r#type: String,
    #[serde(default = "default_ttl_seconds")]
    pub ttl: u64,
    #[serde(default)]
    pub claims: HashMap<String, serde_json::Value>,
}

fn default_ttl_seconds() -> u64 {
    3600
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
    details: TokenDetails,
}

#[derive(Serialize)]
struct TokenDetails {
    id: String,
    r#type: String,
    ttl: u64,
}

/// Issues a JWT for the given subject. Guarded the same way the pub/sub
/// websocket is: a valid bearer token (or anonymous, in development mode
/// with signing disabled, in which case issuance itself fails below).
pub async fn issue_token(
    State(state): State<AppState>,
    _caller: BearerAuth,
    Json(request): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ServerError> {
    let token = state
        .auth
        .signer
        .sign(&request.id, Duration::from_secs(request.ttl), request.claims)
        .map_err(ServerError::Auth)?;

    Ok(Json(TokenResponse {
        token,
        details: TokenDetails {
            id: request.id,
            r#type: request.r#type,
            ttl: request.ttl,
        },
    }))
}

pub async fn jwks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.auth.signer.jwks())
}

#[derive(Deserialize)]
pub struct PolicyQuery {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub base_hash: Option<String>,
}

pub async fn get_policy(
    State(state): State<AppState>,
    Query(query): Query<PolicyQuery>,
    _claims: BearerAuth,
) -> Result<Response, ServerError> {
    if !state.policy_repo.is_ready() {
        return Err(ServerError::NotReady);
    }

    let repo_path = state.policy_repo.repo_path.clone();
    let mut bundle_maker = state.policy_repo.bundle_maker.clone();
    if let Some(path) = &query.path
        && !path.is_empty()
        && path != "."
    {
        bundle_maker.in_directories = vec![std::path::PathBuf::from(path)];
    }
    let base_hash = query.base_hash.clone();

    let bundle = tokio::task::spawn_blocking(move || {
        let repo = git2::Repository::open(&repo_path)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        let head = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        match base_hash {
            None => bundle_maker
                .make_bundle(&repo, &head)
                .map_err(|e| ServerError::Internal(e.to_string())),
            Some(hash) => {
                let oid = git2::Oid::from_str(&hash).map_err(|_| ServerError::BaseNotFound)?;
                let base_commit = repo.find_commit(oid).map_err(|_| ServerError::BaseNotFound)?;
                bundle_maker
                    .make_diff_bundle(&repo, &base_commit, &head)
                    .map_err(|e| ServerError::Internal(e.to_string()))
            }
        }
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))??;

    Ok((StatusCode::OK, Json(bundle)).into_response())
}

pub async fn get_data_config(State(state): State<AppState>, _claims: BearerAuth) -> impl IntoResponse {
    Json(ServerDataSourceConfig {
        entries: (*state.bootstrap_data_sources).clone(),
    })
}

pub async fn post_data_update(
    State(state): State<AppState>,
    _claims: BearerAuth,
    Json(update): Json<DataUpdate>,
) -> impl IntoResponse {
    let mut topics: Vec<String> = update
        .entries
        .iter()
        .flat_map(|entry| {
            if entry.topics.is_empty() {
                vec!["policy_data".to_string()]
            } else {
                entry.topics.clone()
            }
        })
        .flat_map(|t| Topic::new(&t).expand())
        .map(|t| t.as_str().to_string())
        .collect();
    topics.sort();
    topics.dedup();

    let data = serde_json::to_value(&update).unwrap_or_else(|_| json!({}));
    state.broadcaster.publish(&topics, data).await;

    StatusCode::OK
}

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServerError> {
    let Some(intake) = &state.webhook else {
        return Err(ServerError::WebhookNotConfigured);
    };

    let header_value = headers
        .get(intake.header_name())
        .and_then(|v| v.to_str().ok());

    if intake.validate_secret(header_value, &body).is_err() {
        return Ok((StatusCode::UNAUTHORIZED, Json(json!({"error": "signature invalid"}))));
    }

    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap_or(json!({}));
    if !intake.matches_upstream(&payload) {
        return Ok((StatusCode::OK, Json(json!({"status": "ignored"}))));
    }

    state
        .broadcaster
        .publish(&[opal_policy::WEBHOOK_TOPIC.to_string()], json!({}))
        .await;

    Ok((StatusCode::OK, Json(json!({"status": "ok"}))))
}
