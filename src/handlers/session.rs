use axum::{Extension, Json, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::session::Session;

/// The response payload describing the current session.
#[derive(Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Returns the signed-in user's session.
pub async fn me(Extension(session): Extension<Session>) -> impl IntoResponse {
    Json(MeResponse {
        user_id: session.user_id,
        expires_at: session.expires_at,
        refreshed_at: session.refreshed_at,
    })
}

/// Liveness probe.
pub async fn health() -> StatusCode {
    StatusCode::OK
}
