//! HTTP surface: `POST /replay` and `GET /health`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::executor::ReplayResponse;
use crate::service::{Caller, ReplayError, ReplayService};

/// Header carrying the authenticated user id, set by the gateway in front.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the caller's plan flag (`true`/`1` to allow replay).
pub const REPLAY_ALLOWED_HEADER: &str = "x-replay-allowed";

/// Works out who is calling and whether their plan allows replay.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// `None` when the caller is not authenticated.
    async fn authorize(&self, headers: &HeaderMap) -> Option<Caller>;
}

/// Trusts identity headers injected by an authenticating reverse proxy.
///
/// Only sound when the proxy strips these headers from client requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedHeaderAuthorizer;

#[async_trait]
impl Authorizer for TrustedHeaderAuthorizer {
    async fn authorize(&self, headers: &HeaderMap) -> Option<Caller> {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())?;
        let may_replay = headers
            .get(REPLAY_ALLOWED_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| matches!(v.trim(), "true" | "1"));
        Some(Caller::new(user_id, may_replay))
    }
}

#[derive(Clone)]
pub struct AppState {
    service: ReplayService,
    authorizer: Arc<dyn Authorizer>,
}

impl AppState {
    pub fn new(service: ReplayService, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            service,
            authorizer,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/replay", post(replay_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayBody {
    request_id: String,
    target_url: String,
}

#[derive(Debug, Serialize)]
struct ReplayReply {
    status: u16,
    headers: BTreeMap<String, String>,
    body: String,
}

impl From<ReplayResponse> for ReplayReply {
    fn from(response: ReplayResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        }
    }
}

impl ReplayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Input(_) | Self::PolicyRejection => StatusCode::BAD_REQUEST,
            Self::Authz => StatusCode::NOT_FOUND,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Network(_) => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ReplayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

async fn replay_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ReplayBody>, JsonRejection>,
) -> Result<Json<ReplayReply>, ReplayError> {
    let caller = state
        .authorizer
        .authorize(&headers)
        .await
        .ok_or(ReplayError::Authz)?;

    let Json(body) = body.map_err(|e| ReplayError::Input(e.body_text()))?;
    let request_id = Uuid::parse_str(body.request_id.trim())
        .map_err(|_| ReplayError::Input("requestId must be a UUID".into()))?;

    let response = state
        .service
        .replay(&caller, request_id, &body.target_url)
        .await?;
    Ok(Json(response.into()))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
