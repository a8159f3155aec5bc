use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{
    error::{AppError, Result},
    models::action::{ActionRecord, StoredAction},
};

/// Durable key to record map with an absolute expiry per row.
///
/// Survives process restarts; the ephemeral store is rebuilt from it at
/// startup and expired rows are purged by the expiry sweep.
#[async_trait]
pub trait PermanentStore: Send + Sync {
    /// Inserts or replaces the row for `key`.
    async fn put(&self, key: &str, expires_at: DateTime<Utc>, record: &ActionRecord) -> Result<()>;

    /// All rows with `expires_at > now`.
    async fn load_unexpired(&self, now: DateTime<Utc>) -> Result<Vec<StoredAction>>;

    /// Deletes every row with `expires_at < now` in one batch.
    ///
    /// Returns `None` when another sweeper currently holds the store.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Option<u64>>;
}

/// Accepts every write and remembers nothing.
///
/// For deployments that accept losing pending signals on restart.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPermanentStore;

#[async_trait]
impl PermanentStore for NoopPermanentStore {
    async fn put(&self, key: &str, _expires_at: DateTime<Utc>, _record: &ActionRecord) -> Result<()> {
        tracing::trace!("Permanent store disabled, dropping {}", key);
        Ok(())
    }

    async fn load_unexpired(&self, _now: DateTime<Utc>) -> Result<Vec<StoredAction>> {
        Ok(Vec::new())
    }

    async fn delete_expired(&self, _now: DateTime<Utc>) -> Result<Option<u64>> {
        Ok(Some(0))
    }
}

/// In-process permanent store.
#[derive(Debug, Default, Clone)]
pub struct MemoryPermanentStore {
    rows: Arc<RwLock<HashMap<String, StoredAction>>>,
}

impl MemoryPermanentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, expired or not.
    pub async fn rows(&self) -> Vec<StoredAction> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn row(&self, key: &str) -> Option<StoredAction> {
        self.rows.read().await.get(key).cloned()
    }
}

#[async_trait]
impl PermanentStore for MemoryPermanentStore {
    async fn put(&self, key: &str, expires_at: DateTime<Utc>, record: &ActionRecord) -> Result<()> {
        if key.is_empty() {
            return Err(AppError::InvalidArgument("key cannot be empty".to_string()));
        }

        self.rows.write().await.insert(
            key.to_string(),
            StoredAction {
                key: key.to_string(),
                record: *record,
                expires_at,
            },
        );
        Ok(())
    }

    async fn load_unexpired(&self, now: DateTime<Utc>) -> Result<Vec<StoredAction>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|row| row.expires_at > now)
            .cloned()
            .collect())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Option<u64>> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, row| row.expires_at >= now);
        Ok(Some((before - rows.len()) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::action::Purpose;
    use chrono::TimeDelta;

    #[tokio::test]
    async fn memory_store_replaces_rows_by_key() {
        let store = MemoryPermanentStore::new();
        let now = Utc::now();

        store
            .put("k", now + TimeDelta::minutes(1), &ActionRecord::new(now, Purpose::SignOut))
            .await
            .unwrap();
        store
            .put(
                "k",
                now + TimeDelta::minutes(2),
                &ActionRecord::new(now, Purpose::RefreshSession),
            )
            .await
            .unwrap();

        let rows = store.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.purpose, Purpose::RefreshSession);
    }

    #[tokio::test]
    async fn load_unexpired_excludes_rows_at_or_past_expiry() {
        let store = MemoryPermanentStore::new();
        let now = Utc::now();
        let record = ActionRecord::new(now, Purpose::SignOut);

        store.put("live", now + TimeDelta::seconds(1), &record).await.unwrap();
        store.put("edge", now, &record).await.unwrap();
        store.put("dead", now - TimeDelta::seconds(1), &record).await.unwrap();

        let live = store.load_unexpired(now).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].key, "live");
    }

    #[tokio::test]
    async fn noop_store_is_always_empty() {
        let store = NoopPermanentStore;
        let now = Utc::now();
        store
            .put("k", now + TimeDelta::hours(1), &ActionRecord::new(now, Purpose::SignOut))
            .await
            .unwrap();
        assert!(store.load_unexpired(now).await.unwrap().is_empty());
        assert_eq!(store.delete_expired(now).await.unwrap(), Some(0));
    }
}
