//! Message Dispatcher HTTP API
//!
//! Operator endpoints:
//! - `POST /messaging/action/start` starts the poller
//! - `POST /messaging/action/stop` stops it, waiting for the running cycle
//! - `GET /messaging/list/sent?limit=&offset=` pages through sent messages
//!
//! Plus unauthenticated health probes under `/q/health`. Every messaging
//! response uses the `{"code", "msg", "model"}` envelope.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use md_common::Message;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::listing::{SentMessageLister, SentPage};
use crate::poller::MessagePoller;

pub mod auth;

pub use auth::{auth_middleware, credential_digest, is_public_path, AuthConfig, AuthMode, AuthState};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub poller: Arc<MessagePoller>,
    pub lister: Arc<SentMessageLister>,
}

/// Response envelope shared by all messaging endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: String,
    pub msg: String,
    pub model: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn with_model(code: impl Into<String>, msg: impl Into<String>, model: T) -> Self {
        Self {
            code: code.into(),
            msg: msg.into(),
            model: Some(model),
        }
    }

    pub fn message(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            msg: msg.into(),
            model: None,
        }
    }
}

fn envelope<T: Serialize>(status: StatusCode, body: ApiResponse<T>) -> Response {
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusModel {
    pub status: String,
}

/// Sent message as exposed over the API
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: i64,
    pub recipient_phone: String,
    pub content: String,
    pub status: String,
    pub message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_on: Option<DateTime<Utc>>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            recipient_phone: message.recipient_address,
            content: message.content,
            status: message.status.to_string(),
            message_id: message.provider_message_id,
            sent_at: message.sent_at,
            created_on: message.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Pagination {
    /// `null` when no limit was applied
    pub limit: Option<u32>,
    pub offset: u32,
    pub total: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SentMessagesResponse {
    pub messages: Vec<MessageResponse>,
    pub pagination: Pagination,
}

impl From<SentPage> for SentMessagesResponse {
    fn from(page: SentPage) -> Self {
        Self {
            messages: page.messages.into_iter().map(MessageResponse::from).collect(),
            pagination: Pagination {
                limit: page.limit,
                offset: page.offset,
                total: page.total,
                has_more: page.has_more,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSentQuery {
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub poller_running: bool,
}

#[derive(Serialize)]
pub struct ProbeResponse {
    pub status: String,
}

pub fn create_router(state: AppState, auth: AuthState) -> Router {
    Router::new()
        .route("/q/health", get(health_handler))
        .route("/q/health/live", get(liveness_probe))
        .route("/q/health/ready", get(readiness_probe))
        .route("/messaging/action/start", post(start_handler))
        .route("/messaging/action/stop", post(stop_handler))
        .route("/messaging/list/sent", get(list_sent_handler))
        .layer(middleware::from_fn_with_state(auth, auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn start_handler(State(state): State<AppState>) -> Response {
    match state.poller.start().await {
        Ok(()) => {
            info!("Message poller start requested via API");
            envelope(StatusCode::OK, ApiResponse::<()>::message("200", "Message API started successfully"))
        }
        Err(e) => {
            error!(error = %e, "Failed to start message poller");
            envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::<()>::message("500", format!("Failed to start message API: {}", e)),
            )
        }
    }
}

async fn stop_handler(State(state): State<AppState>) -> Response {
    if !state.poller.stop().await {
        return envelope(StatusCode::CONFLICT, ApiResponse::<()>::message("409", "Worker is not running"));
    }
    info!("Message poller stopped via API");

    envelope(
        StatusCode::OK,
        ApiResponse::with_model(
            "200",
            "Message API stopped successfully",
            StatusModel { status: "stopped".to_string() },
        ),
    )
}

async fn list_sent_handler(
    State(state): State<AppState>,
    query: Result<Query<ListSentQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return envelope(
                StatusCode::BAD_REQUEST,
                ApiResponse::<()>::message("400", format!("Invalid query parameters: {}", rejection.body_text())),
            );
        }
    };

    match state.lister.list_sent(query.limit, query.offset).await {
        Ok(page) => envelope(
            StatusCode::OK,
            ApiResponse::with_model("200", "Sent messages retrieved successfully", SentMessagesResponse::from(page)),
        ),
        Err(e) => {
            error!(error = %e, "Failed to list sent messages");
            envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::<()>::message("500", "Failed to retrieve sent messages"),
            )
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        poller_running: state.poller.is_running(),
    })
}

async fn liveness_probe() -> Json<ProbeResponse> {
    Json(ProbeResponse { status: "LIVE".to_string() })
}

async fn readiness_probe() -> Json<ProbeResponse> {
    Json(ProbeResponse { status: "READY".to_string() })
}
