use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use gatehouse_core::access::{self, AccessDecision};
use gatehouse_core::token::deep_link;
use gatehouse_core::{quota, registration};
use gatehouse_db::Database;
use gatehouse_types::api::{
    AccessQuery, AccessResponse, RegisterRequest, RegisterResponse, SubscribeRequest,
    SubscribeResponse,
};

use crate::error::ApiError;
use crate::limit::FixedWindow;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub bot_username: String,
    pub register_limiter: FixedWindow,
    pub global_limiter: FixedWindow,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let handle = req.handle.clone();

    // Run blocking DB work off the async runtime
    let token = tokio::task::spawn_blocking(move || {
        registration::register(&db, &handle, chrono::Utc::now())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!(e))
    })??;

    Ok(Json(RegisterResponse {
        bot_link: deep_link(&state.bot_username, &token),
    }))
}

pub async fn check_access(
    State(state): State<AppState>,
    Query(query): Query<AccessQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let handle = query.handle.clone();

    let decision = tokio::task::spawn_blocking(move || access::check_access(&db, &handle))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!(e))
        })??;

    // Denials carry a 403 with an explicit body rather than an error envelope
    Ok(match decision {
        AccessDecision::Granted => (StatusCode::OK, Json(AccessResponse { access: true })),
        AccessDecision::Denied => (StatusCode::FORBIDDEN, Json(AccessResponse { access: false })),
    })
}

pub async fn subscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let handle = req.handle.clone();
    let channel = req.channel.clone();

    let used = tokio::task::spawn_blocking(move || {
        quota::register_subscription(&db, &handle, &channel, chrono::Utc::now())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!(e))
    })??;

    Ok(Json(SubscribeResponse {
        subscribed: req.channel,
        used,
    }))
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
