use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};

/// Why a record was written.
///
/// `RefreshSession` and `SignOut` are commands published by an operator.
/// `SessionWasRefreshed` and `UserWasSignedOut` are acknowledgements written
/// by the revocation middleware after it acted on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "revocation_purpose")]
pub enum Purpose {
    #[postgres(name = "refresh_session")]
    RefreshSession,
    #[postgres(name = "sign_out")]
    SignOut,
    #[postgres(name = "session_was_refreshed")]
    SessionWasRefreshed,
    #[postgres(name = "user_was_signed_out")]
    UserWasSignedOut,
}

impl Purpose {
    /// Returns the command this purpose represents, or `None` for acknowledgements.
    pub fn as_command(self) -> Option<Command> {
        match self {
            Purpose::RefreshSession => Some(Command::RefreshSession),
            Purpose::SignOut => Some(Command::SignOut),
            Purpose::SessionWasRefreshed | Purpose::UserWasSignedOut => None,
        }
    }
}

/// The purposes an operator is allowed to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    RefreshSession,
    SignOut,
}

impl Command {
    /// The acknowledgement a device records once it has applied this command.
    pub fn acknowledgement(self) -> Purpose {
        match self {
            Command::RefreshSession => Purpose::SessionWasRefreshed,
            Command::SignOut => Purpose::UserWasSignedOut,
        }
    }
}

impl From<Command> for Purpose {
    fn from(command: Command) -> Self {
        match command {
            Command::RefreshSession => Purpose::RefreshSession,
            Command::SignOut => Purpose::SignOut,
        }
    }
}

/// An immutable revocation signal or acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// When the decision was made.
    pub issued_at: DateTime<Utc>,
    /// What the record asks for, or proves.
    pub purpose: Purpose,
}

impl ActionRecord {
    pub fn new(issued_at: DateTime<Utc>, purpose: Purpose) -> Self {
        Self { issued_at, purpose }
    }
}

/// A durable row of the permanent store.
///
/// `expires_at` is absolute and fixed at write time so a restart can compute
/// the remaining lifetime instead of resetting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAction {
    pub key: String,
    pub record: ActionRecord,
    pub expires_at: DateTime<Utc>,
}
