use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a user session.
///
/// Stored in Redis under `session:{session_id}` by the identity layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The ID of the user this session belongs to.
    pub user_id: Uuid,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the session expires.
    pub expires_at: DateTime<Utc>,
    /// The timestamp of the last forced refresh, if any.
    #[serde(default)]
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// The session id of the current request, inserted next to [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId(pub Uuid);

/// Redis key of a session record.
pub fn session_key(session_id: &Uuid) -> String {
    format!("session:{}", session_id)
}
