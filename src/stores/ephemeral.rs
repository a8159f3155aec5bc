use async_trait::async_trait;
use chrono::TimeDelta;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    clock::Clock,
    error::{AppError, Result},
    models::action::ActionRecord,
    stores::permanent::PermanentStore,
};

/// A TTL-expiring string cache: the fast path behind [`EphemeralStore`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Whether a write also goes to the permanent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Durable row first, then the cache entry.
    WriteThrough,
    /// Cache entry only. Used when the row is already durable.
    CacheOnly,
}

/// TTL-scoped key to [`ActionRecord`] map, optionally mirrored to a
/// [`PermanentStore`].
///
/// Every backend call runs under `timeout`; an overrun fails with
/// [`AppError::Cancelled`].
#[derive(Clone)]
pub struct EphemeralStore {
    cache: Arc<dyn CacheBackend>,
    permanent: Arc<dyn PermanentStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl EphemeralStore {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        permanent: Arc<dyn PermanentStore>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            permanent,
            clock,
            timeout,
        }
    }

    /// Stores `record` under `key` for `ttl`.
    ///
    /// With [`WriteMode::WriteThrough`] the durable row (absolute expiry
    /// `now + ttl`) is written before the cache entry, so a crash in between
    /// only loses the copy hydration can restore.
    pub async fn put(&self, key: &str, ttl: Duration, record: &ActionRecord, mode: WriteMode) -> Result<()> {
        require_key(key)?;
        if ttl.is_zero() {
            return Err(AppError::InvalidArgument("ttl must be positive".to_string()));
        }

        if mode == WriteMode::WriteThrough {
            let lifetime = TimeDelta::from_std(ttl)
                .map_err(|_| AppError::InvalidArgument(format!("ttl out of range: {:?}", ttl)))?;
            let expires_at = self.clock.now() + lifetime;
            self.deadline(self.permanent.put(key, expires_at, record)).await?;
        }

        let value = sonic_rs::to_string(record)?;
        self.deadline(self.cache.set(key, value, ttl)).await?;

        tracing::debug!("Stored {:?} under {} for {:?}", record.purpose, key, ttl);
        Ok(())
    }

    /// Returns the live record under `key`; a missing or expired key is `None`.
    pub async fn get(&self, key: &str) -> Result<Option<ActionRecord>> {
        require_key(key)?;

        match self.deadline(self.cache.get(key)).await? {
            Some(value) => Ok(Some(sonic_rs::from_str(&value)?)),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        require_key(key)?;

        self.deadline(self.cache.exists(key)).await
    }

    async fn deadline<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, op)
            .await
            .unwrap_or(Err(AppError::Cancelled))
    }
}

fn require_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(AppError::InvalidArgument("key cannot be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::action::Purpose;
    use crate::stores::memory::MemoryCache;
    use crate::stores::permanent::MemoryPermanentStore;
    use chrono::Utc;

    struct Harness {
        clock: Arc<ManualClock>,
        cache: Arc<MemoryCache>,
        permanent: Arc<MemoryPermanentStore>,
        store: EphemeralStore,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let permanent = Arc::new(MemoryPermanentStore::new());
        let store = EphemeralStore::new(
            cache.clone(),
            permanent.clone(),
            clock.clone(),
            Duration::from_secs(1),
        );
        Harness {
            clock,
            cache,
            permanent,
            store,
        }
    }

    /// A backend that never answers.
    struct Stalled;

    #[async_trait]
    impl CacheBackend for Stalled {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            std::future::pending().await
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn write_through_records_absolute_expiry() {
        let h = harness();
        let record = ActionRecord::new(h.clock.now(), Purpose::SignOut);

        h.store
            .put("k", Duration::from_secs(60), &record, WriteMode::WriteThrough)
            .await
            .unwrap();

        let row = h.permanent.row("k").await.unwrap();
        assert_eq!(row.expires_at, h.clock.now() + TimeDelta::seconds(60));
        assert_eq!(row.record, record);
        assert_eq!(h.store.get("k").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn cache_only_skips_the_permanent_store() {
        let h = harness();
        let record = ActionRecord::new(h.clock.now(), Purpose::RefreshSession);

        h.store
            .put("k", Duration::from_secs(60), &record, WriteMode::CacheOnly)
            .await
            .unwrap();

        assert!(h.permanent.rows().await.is_empty());
        assert!(h.store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let h = harness();
        let record = ActionRecord::new(h.clock.now(), Purpose::SignOut);
        h.store
            .put("k", Duration::from_secs(10), &record, WriteMode::CacheOnly)
            .await
            .unwrap();

        h.clock.advance(TimeDelta::seconds(10));

        assert_eq!(h.store.get("k").await.unwrap(), None);
        assert!(!h.store.exists("k").await.unwrap());
        assert_eq!(h.cache.remaining_ttl("k").await, None);
    }

    #[tokio::test]
    async fn missing_key_is_not_an_error() {
        let h = harness();
        assert_eq!(h.store.get("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_key_and_zero_ttl_are_rejected() {
        let h = harness();
        let record = ActionRecord::new(h.clock.now(), Purpose::SignOut);

        assert!(matches!(
            h.store.put("", Duration::from_secs(1), &record, WriteMode::WriteThrough).await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            h.store.put("k", Duration::ZERO, &record, WriteMode::WriteThrough).await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(h.store.get("").await, Err(AppError::InvalidArgument(_))));
        assert!(matches!(h.store.exists("").await, Err(AppError::InvalidArgument(_))));
        assert!(h.permanent.rows().await.is_empty());
    }

    #[tokio::test]
    async fn stalled_backend_fails_with_cancelled() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = EphemeralStore::new(
            Arc::new(Stalled),
            Arc::new(MemoryPermanentStore::new()),
            clock,
            Duration::from_millis(50),
        );

        assert!(matches!(store.get("k").await, Err(AppError::Cancelled)));
    }
}
