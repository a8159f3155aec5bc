use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use http::request::Parts;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::time::Duration;
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::session::{Session, SessionId, session_key},
};

/// The session cookie name.
pub const SESSION_COOKIE: &str = "session_id";

/// What the revocation protocol needs from the identity layer.
///
/// `refresh_session` and `terminate_session` may run more than once for the
/// same command (two concurrent requests from one device can both decide to
/// act) and must tolerate it.
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    /// Whether the request carries a signed-in principal.
    fn is_authenticated(&self, parts: &Parts) -> bool;

    /// Stable id of the signed-in principal.
    fn subject_id(&self, parts: &Parts) -> Result<String>;

    /// Re-issues the session of the current principal.
    async fn refresh_session(&self, parts: &mut Parts) -> Result<()>;

    /// Ends the session the current request belongs to.
    async fn terminate_session(&self, parts: &mut Parts) -> Result<()>;
}

/// Creates a secure cookie with the given name, value, and max age.
fn create_secure_cookie(name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);

    let is_production = std::env::var("APP_ENV")
        .unwrap_or_else(|_| "development".to_string()) == "production";

    cookie.set_http_only(true);
    if is_production {
        cookie.set_secure(true);
    }

    cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
    let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
    cookie.set_max_age(tower_cookies::cookie::time::Duration::seconds(max_age_secs));
    cookie.set_path("/");

    cookie
}

/// Session authority over the `session:{id}` records kept in Redis.
#[derive(Clone)]
pub struct RedisSessionAuthority {
    redis: ConnectionManager,
    session_ttl: Duration,
}

impl RedisSessionAuthority {
    pub fn new(redis: ConnectionManager, session_ttl: Duration) -> Self {
        Self { redis, session_ttl }
    }
}

#[async_trait]
impl SessionAuthority for RedisSessionAuthority {
    fn is_authenticated(&self, parts: &Parts) -> bool {
        parts.extensions.get::<Session>().is_some()
    }

    fn subject_id(&self, parts: &Parts) -> Result<String> {
        parts
            .extensions
            .get::<Session>()
            .map(|session| session.user_id.to_string())
            .ok_or(AppError::Unauthorized)
    }

    /// Rotates the session id and re-stamps the record.
    async fn refresh_session(&self, parts: &mut Parts) -> Result<()> {
        let session = parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or(AppError::Unauthorized)?;
        let old_id = parts.extensions.get::<SessionId>().copied();

        let now = Utc::now();
        let lifetime = TimeDelta::from_std(self.session_ttl)
            .map_err(|e| AppError::Internal(format!("Session lifetime out of range: {}", e)))?;
        let refreshed = Session {
            expires_at: now + lifetime,
            refreshed_at: Some(now),
            ..session
        };
        let new_id = Uuid::new_v4();
        let session_json = sonic_rs::to_string(&refreshed)?;

        let mut conn = self.redis.clone();
        let _: () = conn
            .set_ex(session_key(&new_id), &session_json, self.session_ttl.as_secs().max(1))
            .await?;
        if let Some(SessionId(old_id)) = old_id {
            let _: () = conn.del(session_key(&old_id)).await?;
        }

        if let Some(cookies) = parts.extensions.get::<Cookies>() {
            cookies.add(create_secure_cookie(
                SESSION_COOKIE,
                new_id.to_string(),
                self.session_ttl,
            ));
        }

        parts.extensions.insert(refreshed);
        parts.extensions.insert(SessionId(new_id));
        tracing::debug!("🔄 Session rotated for user {}", session.user_id);
        Ok(())
    }

    /// Deletes the record and expires the cookie. Deleting a missing record
    /// is a no-op.
    async fn terminate_session(&self, parts: &mut Parts) -> Result<()> {
        if let Some(SessionId(session_id)) = parts.extensions.get::<SessionId>().copied() {
            let mut conn = self.redis.clone();
            let _: () = conn.del(session_key(&session_id)).await?;
        }

        if let Some(cookies) = parts.extensions.get::<Cookies>() {
            let mut session_cookie = Cookie::new(SESSION_COOKIE, "");
            session_cookie.set_max_age(tower_cookies::cookie::time::Duration::seconds(0));
            session_cookie.set_path("/");
            cookies.remove(session_cookie);
        }

        parts.extensions.remove::<Session>();
        parts.extensions.remove::<SessionId>();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_cookies::cookie::SameSite;

    #[test]
    fn session_cookie_is_http_only_and_scoped_to_the_site() {
        let cookie = create_secure_cookie(
            SESSION_COOKIE,
            "abc".to_string(),
            Duration::from_secs(14 * 86400),
        );

        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(
            cookie.max_age(),
            Some(tower_cookies::cookie::time::Duration::seconds(14 * 86400))
        );
    }

    #[test]
    fn session_key_is_namespaced() {
        let id = Uuid::nil();
        assert_eq!(session_key(&id), "session:00000000-0000-0000-0000-000000000000");
    }
}
