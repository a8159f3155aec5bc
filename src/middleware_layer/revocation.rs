use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{header, request::Parts};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::{
    clock::Clock,
    config::RevocationWindows,
    error::{AppError, Result},
    keys::KeyGenerator,
    models::action::{ActionRecord, Command},
    services::session::SessionAuthority,
    stores::ephemeral::{EphemeralStore, WriteMode},
};

/// What the gate did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No signed-in principal; nothing was read.
    Anonymous,
    /// No command pending for the subject.
    NoCommand,
    /// This device already applied the pending command.
    AlreadyApplied,
    /// The session was refreshed and the device acknowledged it.
    Refreshed,
    /// The session was terminated and the device acknowledged it.
    SignedOut,
}

/// Whether a device still has to apply `command`.
///
/// A device acts when it has no acknowledgement or only one older than the
/// command. Equal timestamps count as handled.
pub fn must_act(command: &ActionRecord, acknowledgement: Option<&ActionRecord>) -> bool {
    acknowledgement.is_none_or(|ack| ack.issued_at < command.issued_at)
}

/// Per-request revocation decision.
pub struct RevocationGate {
    store: EphemeralStore,
    keys: KeyGenerator,
    authority: Arc<dyn SessionAuthority>,
    clock: Arc<dyn Clock>,
    windows: RevocationWindows,
}

/// Stands in for a fingerprint part the request does not carry.
const UNKNOWN_CLIENT: &str = "-";

/// Extracts the client fingerprint (user agent, peer address) of a request.
///
/// Always yields non-empty parts: leaving out a header must not exempt a
/// device from a pending command.
fn client_fingerprint(parts: &Parts) -> (String, String) {
    let agent = parts
        .headers
        .get(header::USER_AGENT)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .filter(|agent| !agent.is_empty())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    let addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    (agent, addr)
}

impl RevocationGate {
    pub fn new(
        store: EphemeralStore,
        keys: KeyGenerator,
        authority: Arc<dyn SessionAuthority>,
        clock: Arc<dyn Clock>,
        windows: RevocationWindows,
    ) -> Self {
        Self {
            store,
            keys,
            authority,
            clock,
            windows,
        }
    }

    /// Applies the subject's pending command to this device at most once per
    /// command generation.
    ///
    /// Store and capability failures are returned as-is; the caller decides
    /// to fail open. A lost acknowledgement write is only logged: the action
    /// is idempotent and simply runs again on the next request.
    pub async fn evaluate(&self, parts: &mut Parts) -> Result<Decision> {
        if !self.authority.is_authenticated(parts) {
            return Ok(Decision::Anonymous);
        }

        let subject_id = self.authority.subject_id(parts)?;
        let broadcast_key = self.keys.broadcast_key(&subject_id)?;
        let Some(record) = self.store.get(&broadcast_key).await? else {
            return Ok(Decision::NoCommand);
        };
        let command = record
            .purpose
            .as_command()
            .ok_or(AppError::ProtocolViolation(record.purpose))?;

        let (agent, addr) = client_fingerprint(parts);
        let device_key = self.keys.device_key(&subject_id, &agent, &addr)?;
        let acknowledgement = self.store.get(&device_key).await?;

        if !must_act(&record, acknowledgement.as_ref()) {
            return Ok(Decision::AlreadyApplied);
        }

        let decision = match command {
            Command::RefreshSession => {
                self.authority.refresh_session(parts).await?;
                tracing::info!("🔄 Session of user '{}' has been refreshed", subject_id);
                Decision::Refreshed
            }
            Command::SignOut => {
                self.authority.terminate_session(parts).await?;
                tracing::info!("👋 User '{}' has been signed out", subject_id);
                Decision::SignedOut
            }
        };

        // A lagging clock must not stamp the acknowledgement before the command.
        let issued_at = self.clock.now().max(record.issued_at);
        let acknowledgement = ActionRecord::new(issued_at, command.acknowledgement());
        if let Err(e) = self
            .store
            .put(
                &device_key,
                self.windows.for_command(command),
                &acknowledgement,
                WriteMode::WriteThrough,
            )
            .await
        {
            tracing::warn!(
                "⚠️ Could not record {:?} for user '{}': {}",
                acknowledgement.purpose,
                subject_id,
                e
            );
        }

        Ok(decision)
    }
}

/// A middleware that applies pending revocation commands to the current
/// session.
///
/// Never rejects a request because of the revocation layer itself, except for
/// a corrupted command record, which is a bug and ends the request with a 500.
pub async fn enforce_revocations(
    State(gate): State<Arc<RevocationGate>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    match gate.evaluate(&mut parts).await {
        Ok(decision) => {
            tracing::debug!("🔐 Revocation decision: {:?}", decision);
        }
        Err(AppError::ProtocolViolation(purpose)) => {
            return AppError::ProtocolViolation(purpose).into_response();
        }
        Err(e) if e.is_transient() => {
            tracing::warn!("⚠️ Revocation store unavailable, failing open: {}", e);
        }
        Err(e) => {
            tracing::warn!("⚠️ Revocation check skipped, failing open: {}", e);
        }
    }

    next.run(Request::from_parts(parts, body)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::action::Purpose;
    use chrono::{TimeDelta, Utc};

    #[test]
    fn missing_acknowledgement_requires_action() {
        let command = ActionRecord::new(Utc::now(), Purpose::SignOut);
        assert!(must_act(&command, None));
    }

    #[test]
    fn stale_acknowledgement_requires_action() {
        let now = Utc::now();
        let command = ActionRecord::new(now, Purpose::RefreshSession);
        let ack = ActionRecord::new(now - TimeDelta::seconds(5), Purpose::SessionWasRefreshed);
        assert!(must_act(&command, Some(&ack)));
    }

    #[test]
    fn equal_timestamps_count_as_handled() {
        let now = Utc::now();
        let command = ActionRecord::new(now, Purpose::SignOut);
        let ack = ActionRecord::new(now, Purpose::UserWasSignedOut);
        assert!(!must_act(&command, Some(&ack)));
    }

    #[test]
    fn newer_acknowledgement_is_handled() {
        let now = Utc::now();
        let command = ActionRecord::new(now, Purpose::SignOut);
        let ack = ActionRecord::new(now + TimeDelta::seconds(1), Purpose::UserWasSignedOut);
        assert!(!must_act(&command, Some(&ack)));
    }
}
