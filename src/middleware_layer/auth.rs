use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    config::Config,
    error::AppError,
    models::session::{Session, SessionId, session_key},
    services::session::SESSION_COOKIE,
    state::AppState,
};

use redis::AsyncCommands;

/// Extracts the session token from the request cookies.
///
/// # Arguments
///
/// * `cookies` - The request cookies.
///
/// # Returns
///
/// An `Option` containing the session ID if found.
fn extract_session_token(cookies: &Cookies) -> Option<Uuid> {
    cookies
        .get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

/// A middleware that attaches the current session, if any, to the request.
///
/// Requests without a valid session continue anonymously; use
/// [`require_auth`] further in to reject them.
pub async fn load_session(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(session_id) = extract_session_token(&cookies) else {
        return next.run(request).await;
    };

    tracing::debug!("🔑 Found session_id: {}", session_id);

    let mut redis = state.redis.clone();
    let session_json: Option<String> = match redis.get(session_key(&session_id)).await {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("❌ Redis error while loading session: {}", e);
            None
        }
    };

    let session = session_json.and_then(|json| {
        sonic_rs::from_str::<Session>(&json)
            .map_err(|e| tracing::warn!("❌ Invalid session JSON: {}", e))
            .ok()
    });

    match session {
        Some(session) if chrono::Utc::now() <= session.expires_at => {
            tracing::debug!("✅ Session loaded for user: {}", session.user_id);
            request.extensions_mut().insert(SessionId(session_id));
            request.extensions_mut().insert(session);
        }
        Some(session) => {
            tracing::warn!("❌ Session expired for user: {}", session.user_id);
            let _: () = redis.del(session_key(&session_id)).await.unwrap_or(());
        }
        None => {}
    }

    next.run(request).await
}

/// A middleware that requires a valid session to be present.
pub async fn require_auth(request: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    if request.extensions().get::<Session>().is_none() {
        tracing::warn!("❌ No active session");
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(request).await)
}

/// A middleware that guards operator endpoints with the configured bearer
/// token.
pub async fn require_admin(
    State(config): State<Arc<Config>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = config.admin_token.as_ref() else {
        tracing::warn!("❌ Operator endpoint called but ADMIN_TOKEN is not configured");
        return AppError::Unauthorized.into_response();
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let authorized = presented
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);

    if !authorized {
        return AppError::Authentication("Invalid operator token".to_string()).into_response();
    }

    next.run(request).await
}
