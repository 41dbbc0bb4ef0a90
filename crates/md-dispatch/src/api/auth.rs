//! Authentication middleware for the operator API
//!
//! Supports:
//! - BasicAuth checked against SHA-256 digests of `user:password`
//! - No authentication (for development)
//!
//! Digests come in two lists, `current` and `previous`, so credentials can be
//! rotated without downtime. Plain passwords are never configured.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::ApiResponse;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    #[default]
    None,
    Basic,
}

impl AuthMode {
    pub fn from_config_value(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "none" | "" => Some(Self::None),
            "basic" => Some(Self::Basic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// Hex SHA-256 digests of `user:password` currently issued
    pub current_digests: Vec<String>,
    /// Digests still accepted while clients rotate
    pub previous_digests: Vec<String>,
}

impl AuthConfig {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn basic(current_digests: Vec<String>, previous_digests: Vec<String>) -> Self {
        Self {
            mode: AuthMode::Basic,
            current_digests,
            previous_digests,
        }
    }
}

/// Hex SHA-256 of `user:password`, the form credentials are configured in
pub fn credential_digest(username: &str, password: &str) -> String {
    hex::encode(digest_bytes(username, password))
}

fn digest_bytes(username: &str, password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

#[derive(Clone)]
pub struct AuthState {
    mode: AuthMode,
    /// Decoded digests, current first
    digests: Arc<Vec<Vec<u8>>>,
}

impl AuthState {
    pub fn new(config: AuthConfig) -> Self {
        let digests = config
            .current_digests
            .iter()
            .chain(config.previous_digests.iter())
            .filter_map(|d| match hex::decode(d.trim()) {
                Ok(bytes) if bytes.len() == 32 => Some(bytes),
                _ => {
                    warn!("Ignoring malformed credential digest");
                    None
                }
            })
            .collect::<Vec<_>>();

        if config.mode == AuthMode::Basic && digests.is_empty() {
            warn!("BasicAuth enabled but no valid credential digests configured; all requests will be rejected");
        }

        Self {
            mode: config.mode,
            digests: Arc::new(digests),
        }
    }

    fn accepts(&self, username: &str, password: &str) -> bool {
        let presented = digest_bytes(username, password);

        // Check every digest so timing does not reveal which list matched
        self.digests
            .iter()
            .fold(0u8, |found, expected| found | presented.as_slice().ct_eq(expected.as_slice()).unwrap_u8())
            == 1
    }
}

/// Paths reachable without credentials
pub fn is_public_path(path: &str) -> bool {
    matches!(
        path,
        "/q/health" | "/q/health/live" | "/q/health/ready" | "/metrics"
    )
}

pub async fn auth_middleware(State(state): State<AuthState>, request: Request, next: Next) -> Response {
    if state.mode == AuthMode::None || is_public_path(request.uri().path()) {
        return next.run(request).await;
    }

    match basic_credentials(&request) {
        Some((username, password)) if state.accepts(&username, &password) => {
            debug!(username = %username, "BasicAuth successful");
            next.run(request).await
        }
        Some((username, _)) => {
            warn!(username = %username, "BasicAuth failed");
            unauthorized()
        }
        None => {
            warn!("Missing or malformed Authorization header");
            unauthorized()
        }
    }
}

fn basic_credentials(request: &Request) -> Option<(String, String)> {
    let auth = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = auth.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (username, password) = credentials.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn unauthorized() -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::message("401", "Unauthorized")),
    )
        .into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"Message Dispatcher\""),
    );
    response
}
