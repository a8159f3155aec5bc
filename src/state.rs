use redis::aio::ConnectionManager;
use std::sync::Arc;
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheBackendKind, Config};
use crate::error::Result;
use crate::keys::KeyGenerator;
use crate::middleware_layer::revocation::RevocationGate;
use crate::services::{
    hydration::HydrationService,
    revocation::RevocationService,
    session::RedisSessionAuthority,
    sweep::ExpirySweep,
};
use crate::stores::{
    ephemeral::{CacheBackend, EphemeralStore},
    memory::MemoryCache,
    permanent::{NoopPermanentStore, PermanentStore},
    postgres::PostgresPermanentStore,
    redis_cache::RedisCache,
};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The Redis connection manager (sessions, and the cache when selected).
    pub redis: ConnectionManager,
    /// The application's configuration.
    pub config: Arc<Config>,
    /// The ephemeral revocation store.
    pub store: EphemeralStore,
    /// The permanent revocation store.
    pub permanent: Arc<dyn PermanentStore>,
    /// The time source of every record.
    pub clock: Arc<dyn Clock>,
    /// The in-process cache, when it backs the ephemeral store.
    pub memory_cache: Option<MemoryCache>,
    /// Command publishing.
    pub revocations: RevocationService,
    /// Per-request decision.
    pub gate: Arc<RevocationGate>,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis Connection Manager initialized (pooled)");

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let permanent: Arc<dyn PermanentStore> = match &config.database_url {
            Some(url) => {
                let pool = crate::db::create_pool(url)?;
                crate::db::ensure_schema(&pool).await?;
                tracing::info!("✅ PostgreSQL permanent store initialized");
                Arc::new(PostgresPermanentStore::new(pool))
            }
            None => {
                tracing::warn!("⚠️ DATABASE_URL not set, pending revocations will not survive a restart");
                Arc::new(NoopPermanentStore)
            }
        };

        let (cache, memory_cache): (Arc<dyn CacheBackend>, Option<MemoryCache>) = match config.cache_backend {
            CacheBackendKind::Redis => (Arc::new(RedisCache::new(redis.clone())), None),
            CacheBackendKind::Memory => {
                tracing::warn!("⚠️ Using in-process revocation cache, signals are not shared between instances");
                let memory = MemoryCache::new(clock.clone());
                (Arc::new(memory.clone()), Some(memory))
            }
        };

        let store = EphemeralStore::new(cache, permanent.clone(), clock.clone(), config.store_timeout);
        let keys = KeyGenerator::new(config.key_prefix.clone());

        let revocations = RevocationService::new(
            store.clone(),
            keys.clone(),
            clock.clone(),
            config.windows,
        );

        let authority = Arc::new(RedisSessionAuthority::new(
            redis.clone(),
            config.windows.session_refresh,
        ));
        let gate = Arc::new(RevocationGate::new(
            store.clone(),
            keys,
            authority,
            clock.clone(),
            config.windows,
        ));
        tracing::info!("✅ Revocation gate initialized");

        Ok(AppState {
            redis,
            config: Arc::new(config.clone()),
            store,
            permanent,
            clock,
            memory_cache,
            revocations,
            gate,
        })
    }

    /// The startup hydration job over this state's stores.
    pub fn hydration(&self) -> HydrationService {
        HydrationService::new(self.store.clone(), self.permanent.clone(), self.clock.clone())
    }

    /// The expiry sweep over this state's permanent store.
    pub fn sweep(&self) -> ExpirySweep {
        ExpirySweep::new(self.permanent.clone(), self.clock.clone())
    }
}
