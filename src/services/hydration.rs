use std::sync::Arc;

use crate::{
    clock::Clock,
    error::Result,
    stores::{
        ephemeral::{EphemeralStore, WriteMode},
        permanent::PermanentStore,
    },
};

/// Outcome of a hydration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationReport {
    /// Rows re-admitted to the ephemeral store.
    pub admitted: usize,
    /// Rows that expired between the read and the write.
    pub expired: usize,
}

/// Rebuilds the ephemeral store from the permanent store at startup.
///
/// Each live row is re-admitted with its remaining lifetime
/// (`expires_at - now`), never a fresh one, and without writing it back.
pub struct HydrationService {
    store: EphemeralStore,
    permanent: Arc<dyn PermanentStore>,
    clock: Arc<dyn Clock>,
}

impl HydrationService {
    pub fn new(store: EphemeralStore, permanent: Arc<dyn PermanentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            permanent,
            clock,
        }
    }

    pub async fn run(&self) -> Result<HydrationReport> {
        let rows = self.permanent.load_unexpired(self.clock.now()).await?;
        let mut report = HydrationReport::default();

        for row in rows {
            let remaining = match (row.expires_at - self.clock.now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    report.expired += 1;
                    continue;
                }
            };

            self.store
                .put(&row.key, remaining, &row.record, WriteMode::CacheOnly)
                .await?;
            report.admitted += 1;
        }

        tracing::info!(
            "💧 Hydrated {} revocation records ({} expired during load)",
            report.admitted,
            report.expired
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::action::{ActionRecord, Purpose};
    use crate::stores::memory::MemoryCache;
    use crate::stores::permanent::MemoryPermanentStore;
    use chrono::{TimeDelta, Utc};
    use std::time::Duration;

    #[tokio::test]
    async fn readmits_with_remaining_lifetime_only() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let permanent = Arc::new(MemoryPermanentStore::new());
        let issued = clock.now();
        let record = ActionRecord::new(issued, Purpose::SignOut);

        permanent.put("live", issued + TimeDelta::seconds(90), &record).await.unwrap();
        permanent.put("gone", issued + TimeDelta::seconds(10), &record).await.unwrap();

        // restart 30s later with an empty cache
        clock.advance(TimeDelta::seconds(30));
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let store = EphemeralStore::new(cache.clone(), permanent.clone(), clock.clone(), Duration::from_secs(1));

        let report = HydrationService::new(store.clone(), permanent.clone(), clock.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report, HydrationReport { admitted: 1, expired: 0 });
        assert_eq!(cache.remaining_ttl("live").await, Some(Duration::from_secs(60)));
        assert_eq!(store.get("live").await.unwrap(), Some(record));
        assert_eq!(store.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn does_not_rewrite_durable_rows() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let permanent = Arc::new(MemoryPermanentStore::new());
        let expires_at = clock.now() + TimeDelta::minutes(5);
        let record = ActionRecord::new(clock.now(), Purpose::RefreshSession);
        permanent.put("k", expires_at, &record).await.unwrap();

        clock.advance(TimeDelta::minutes(1));
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let store = EphemeralStore::new(cache, permanent.clone(), clock.clone(), Duration::from_secs(1));
        HydrationService::new(store, permanent.clone(), clock.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(permanent.row("k").await.unwrap().expires_at, expires_at);
    }
}
