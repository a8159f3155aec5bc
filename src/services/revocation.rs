use std::sync::Arc;

use crate::{
    clock::Clock,
    config::RevocationWindows,
    error::{AppError, Result},
    keys::KeyGenerator,
    models::action::{ActionRecord, Command},
    stores::ephemeral::{EphemeralStore, WriteMode},
};

/// Publishes revocation commands for a subject.
///
/// A command supersedes whatever command the subject had pending. Failures
/// are returned to the caller: a command that was not durably recorded was
/// not published.
#[derive(Clone)]
pub struct RevocationService {
    store: EphemeralStore,
    keys: KeyGenerator,
    clock: Arc<dyn Clock>,
    windows: RevocationWindows,
}

impl RevocationService {
    pub fn new(
        store: EphemeralStore,
        keys: KeyGenerator,
        clock: Arc<dyn Clock>,
        windows: RevocationWindows,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            windows,
        }
    }

    pub async fn publish(&self, subject_id: &str, command: Command) -> Result<ActionRecord> {
        let key = self.keys.broadcast_key(subject_id)?;
        let record = ActionRecord::new(self.clock.now(), command.into());

        self.store
            .put(&key, self.windows.for_command(command), &record, WriteMode::WriteThrough)
            .await
            .inspect_err(|e| {
                tracing::error!("❌ Failed to publish {:?} for {}: {}", command, subject_id, e);
            })?;

        tracing::info!("📣 Published {:?} for subject {}", command, subject_id);
        Ok(record)
    }

    /// Forces every session of `subject_id` to reload its claims.
    pub async fn refresh_session(&self, subject_id: &str) -> Result<ActionRecord> {
        self.publish(subject_id, Command::RefreshSession).await
    }

    /// Signs `subject_id` out on every device.
    pub async fn sign_out(&self, subject_id: &str) -> Result<ActionRecord> {
        self.publish(subject_id, Command::SignOut).await
    }

    /// The command currently pending for `subject_id`, if any.
    pub async fn pending(&self, subject_id: &str) -> Result<Option<ActionRecord>> {
        let key = self.keys.broadcast_key(subject_id)?;
        let record = self.store.get(&key).await?;

        match record {
            Some(record) if record.purpose.as_command().is_none() => {
                Err(AppError::ProtocolViolation(record.purpose))
            }
            other => Ok(other),
        }
    }

    pub async fn has_pending(&self, subject_id: &str) -> Result<bool> {
        let key = self.keys.broadcast_key(subject_id)?;
        self.store.exists(&key).await
    }
}
