//! HTTP Basic Authentication for staff endpoints

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Staff credentials
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Username for staff routes (None = auth disabled)
    pub username: Option<String>,
    /// Password for staff routes
    pub password: Option<String>,
}

impl AuthConfig {
    /// Read STAFF_USERNAME and STAFF_PASSWORD; auth is only enabled when
    /// both are non-empty
    pub fn from_env() -> Self {
        match (env_credential("STAFF_USERNAME"), env_credential("STAFF_PASSWORD")) {
            (Some(username), Some(password)) => {
                tracing::info!(%username, "Staff authentication enabled");
                Self {
                    username: Some(username),
                    password: Some(password),
                }
            }
            (username, password) => {
                if username.is_some() != password.is_some() {
                    tracing::warn!("Only one of STAFF_USERNAME / STAFF_PASSWORD is set");
                }
                tracing::warn!("Staff authentication DISABLED, anyone can issue access codes");
                Self {
                    username: None,
                    password: None,
                }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    pub fn validate(&self, username: &str, password: &str) -> bool {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => {
                // Evaluate both so timing does not reveal which half matched
                let user_ok = u.as_bytes().ct_eq(username.as_bytes());
                let pass_ok = p.as_bytes().ct_eq(password.as_bytes());
                bool::from(user_ok & pass_ok)
            }
            _ => true,
        }
    }

    /// Check an `Authorization: Basic ...` header value
    fn accepts_header(&self, value: &str) -> bool {
        let Some(encoded) = value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        decoded
            .split_once(':')
            .is_some_and(|(username, password)| self.validate(username, password))
    }
}

fn env_credential(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Middleware requiring HTTP Basic Auth on staff routes
pub async fn staff_auth_middleware(
    State(auth_config): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !auth_config.is_enabled() {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| auth_config.accepts_header(value));

    if authorized {
        return next.run(request).await;
    }

    tracing::warn!(uri = %request.uri(), "Rejected staff request without valid credentials");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"Prize Claims Staff\"")],
        "Unauthorized",
    )
        .into_response()
}
