use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    error::{AppError, Result},
    stores::ephemeral::CacheBackend,
};

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-process TTL cache for single-instance deployments.
///
/// Entries expire against the injected [`Clock`] and are dropped lazily on
/// read or by [`MemoryCache::purge_expired`].
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Time left before `key` expires, if it is live.
    pub async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        (entry.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Drops every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of held entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Purges expired entries every `interval` until `shutdown` is cancelled.
    ///
    /// Acknowledgements of devices that never return are otherwise held for
    /// the life of the process.
    pub fn spawn_purge(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let purged = self.purge_expired().await;
                if purged > 0 {
                    tracing::debug!("🧹 Purged {} expired revocation cache entries", purged);
                }
            }
        })
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|_| AppError::InvalidArgument(format!("ttl out of range: {:?}", ttl)))?;
        let expires_at = self.clock.now() + ttl;

        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn entries_expire_on_the_clock() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = MemoryCache::new(clock.clone());

        cache.set("k", "v".to_string(), Duration::from_secs(30)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.remaining_ttl("k").await, Some(Duration::from_secs(30)));

        clock.advance(TimeDelta::seconds(29));
        assert_eq!(cache.remaining_ttl("k").await, Some(Duration::from_secs(1)));

        clock.advance(TimeDelta::seconds(1));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn set_overwrites_value_and_ttl() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = MemoryCache::new(clock.clone());

        cache.set("k", "old".to_string(), Duration::from_secs(5)).await.unwrap();
        cache.set("k", "new".to_string(), Duration::from_secs(50)).await.unwrap();

        clock.advance(TimeDelta::seconds(10));
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn purge_removes_only_expired_entries() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = MemoryCache::new(clock.clone());

        cache.set("short", "a".to_string(), Duration::from_secs(1)).await.unwrap();
        cache.set("long", "b".to_string(), Duration::from_secs(100)).await.unwrap();
        clock.advance(TimeDelta::seconds(2));

        assert_eq!(cache.purge_expired().await, 1);
        assert!(cache.exists("long").await.unwrap());
    }

    #[tokio::test]
    async fn scheduled_purge_drops_entries_that_are_never_read() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = MemoryCache::new(clock.clone());

        for i in 0..1000 {
            cache
                .set(&format!("device:{}", i), "ack".to_string(), Duration::from_secs(1))
                .await
                .unwrap();
        }
        cache.set("live", "cmd".to_string(), Duration::from_secs(7200)).await.unwrap();
        clock.advance(TimeDelta::hours(1));

        let shutdown = CancellationToken::new();
        let handle = cache
            .clone()
            .spawn_purge(Duration::from_millis(10), shutdown.clone());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while cache.len().await > 1 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(cache.len().await, 1);
        assert!(cache.exists("live").await.unwrap());
    }
}
