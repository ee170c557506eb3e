//! HTTP endpoints for issuing and checking claim-form access codes.
//!
//! Staff issue a code and hand it to the prize winner; the claim form is only
//! served to requests carrying a code that is still valid.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::access_code::{AccessCodeCodec, AccessCodeError};
use crate::auth::{staff_auth_middleware, AuthConfig};
use crate::config::GateConfig;
use crate::dedup::Deduplicator;

/// Header carrying the access code on gated requests
pub const ACCESS_CODE_HEADER: HeaderName = HeaderName::from_static("x-access-code");

/// Shared application state
pub struct AppState {
    pub config: GateConfig,
    pub codec: AccessCodeCodec,
    pub dedup: Deduplicator,
}

impl AppState {
    pub fn new(config: GateConfig) -> Result<Self, AccessCodeError> {
        let codec = AccessCodeCodec::new(config.scheme.clone())?;
        Ok(Self {
            config,
            codec,
            dedup: Deduplicator::new(),
        })
    }

    /// Whether `code` is currently accepted
    pub fn code_is_valid(&self, code: &str) -> bool {
        self.codec.validate_now(code, self.config.anchor_ms)
    }

    fn expires_at(&self, code: &str) -> Option<String> {
        self.codec
            .expiry_ms(code, self.config.anchor_ms)
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(|dt| dt.to_rfc3339())
    }
}

/// Errors surfaced by the HTTP handlers
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    AccessCode(#[from] AccessCodeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::AccessCode(AccessCodeError::GenerationExhausted { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::AccessCode(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(%status, "Request failed: {}", self);
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// A freshly issued access code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCode {
    pub code: String,
    /// RFC 3339 expiry instant
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Issue a new access code.
///
/// POST /api/access-codes
///
/// Concurrent requests for the same window share a single search.
pub async fn issue_access_code(
    State(state): State<Arc<AppState>>,
) -> Result<Json<IssuedCode>, ApiError> {
    let anchor_ms = state.config.anchor_ms;
    let window_ms = state.config.window_ms();
    let codec = state.codec.clone();

    let code = state
        .dedup
        .call(format!("issue:{anchor_ms}:{window_ms}"), move || async move {
            tokio::task::spawn_blocking(move || codec.generate_now(anchor_ms, window_ms))
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?
                .map_err(ApiError::from)
        })
        .await?;

    let expires_at = state
        .expires_at(&code)
        .ok_or_else(|| ApiError::Internal(format!("issued code `{code}` has no expiry")))?;

    tracing::info!(%expires_at, "Issued access code");
    Ok(Json(IssuedCode { code, expires_at }))
}

/// Check an access code.
///
/// POST /api/access-codes/verify
pub async fn verify_access_code(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyRequest>,
) -> Json<VerifyResponse> {
    let code = request.code.trim();
    let valid = state.code_is_valid(code);
    let expires_at = if valid { state.expires_at(code) } else { None };
    Json(VerifyResponse { valid, expires_at })
}

fn query_param<'a>(request: &'a Request<Body>, key: &str) -> Option<&'a str> {
    request
        .uri()
        .query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find_map(|(k, v)| (k == key).then_some(v))
}

/// Middleware admitting only requests that carry a valid access code, either
/// in the `X-Access-Code` header or the `code` query parameter.
pub async fn require_access_code(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let verdict = request
        .headers()
        .get(&ACCESS_CODE_HEADER)
        .and_then(|value| value.to_str().ok())
        .or_else(|| query_param(&request, "code"))
        .map(|code| state.code_is_valid(code.trim()));

    match verdict {
        Some(true) => next.run(request).await,
        Some(false) => {
            tracing::warn!(uri = %request.uri(), "Rejected invalid or expired access code");
            (StatusCode::FORBIDDEN, "Access code invalid or expired").into_response()
        }
        None => (StatusCode::FORBIDDEN, "Access code required").into_response(),
    }
}

/// Handler to serve claim.html (used behind the access code gate)
pub async fn serve_claim_form() -> Response {
    match tokio::fs::read_to_string("static/claim.html").await {
        Ok(content) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            content,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "Claim form not found").into_response(),
    }
}

/// Assemble all routes
pub fn router(state: Arc<AppState>, auth_config: Arc<AuthConfig>) -> Router {
    let staff_routes = Router::new()
        .route("/api/access-codes", post(issue_access_code))
        .layer(middleware::from_fn_with_state(
            auth_config,
            staff_auth_middleware,
        ));

    let gated_routes = Router::new()
        .route("/claim", get(serve_claim_form))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_access_code,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/api/access-codes/verify", post(verify_access_code))
        .merge(staff_routes)
        .merge(gated_routes)
        .with_state(state)
}
