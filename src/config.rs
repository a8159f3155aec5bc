use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

use crate::keys::DEFAULT_PREFIX;
use crate::models::action::Command;

/// Which cache sits behind the ephemeral store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    /// Shared Redis, for horizontally scaled deployments.
    Redis,
    /// In-process map, for a single instance.
    Memory,
}

impl FromStr for CacheBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("Unknown CACHE_BACKEND '{}' (expected redis or memory)", other),
        }
    }
}

/// How long records live, per command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevocationWindows {
    /// Lifetime of a session cookie. A refresh command and its
    /// acknowledgements live this long.
    pub session_refresh: Duration,
    /// Session revalidation interval. A sign-out command and its
    /// acknowledgements live this long.
    pub sign_out: Duration,
}

impl RevocationWindows {
    pub fn for_command(&self, command: Command) -> Duration {
        match command {
            Command::RefreshSession => self.session_refresh,
            Command::SignOut => self.sign_out,
        }
    }
}

impl Default for RevocationWindows {
    fn default() -> Self {
        Self {
            session_refresh: Duration::from_secs(14 * 86400),
            sign_out: Duration::from_secs(30 * 60),
        }
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The address the server listens on.
    pub bind_addr: SocketAddr,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// The backend of the ephemeral store.
    pub cache_backend: CacheBackendKind,
    /// The URL of the PostgreSQL database; `None` disables durability.
    pub database_url: Option<String>,
    /// Record lifetimes.
    pub windows: RevocationWindows,
    /// How often expired durable rows are purged.
    pub sweep_interval: Duration,
    /// Deadline of a single store call on the request path.
    pub store_timeout: Duration,
    /// Namespace of every revocation key.
    pub key_prefix: String,
    /// Bearer token of the operator endpoints.
    pub admin_token: Option<Zeroizing<String>>,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Creates a new `Config` from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let session_days: u64 = var("SESSION_DURATION_DAYS", "14")
            .parse()
            .context("Invalid SESSION_DURATION_DAYS")?;
        let sign_out_secs: u64 = var("SIGN_OUT_WINDOW_SECS", "1800")
            .parse()
            .context("Invalid SIGN_OUT_WINDOW_SECS")?;
        let sweep_secs: u64 = var("SWEEP_INTERVAL_SECS", "21600")
            .parse()
            .context("Invalid SWEEP_INTERVAL_SECS")?;
        let store_timeout_ms: u64 = var("STORE_TIMEOUT_MS", "500")
            .parse()
            .context("Invalid STORE_TIMEOUT_MS")?;

        if session_days == 0 || sign_out_secs == 0 {
            anyhow::bail!("SESSION_DURATION_DAYS and SIGN_OUT_WINDOW_SECS must be positive");
        }
        if sweep_secs == 0 || store_timeout_ms == 0 {
            anyhow::bail!("SWEEP_INTERVAL_SECS and STORE_TIMEOUT_MS must be positive");
        }

        let key_prefix = var("REVOCATION_KEY_PREFIX", DEFAULT_PREFIX);
        if key_prefix.is_empty() {
            anyhow::bail!("REVOCATION_KEY_PREFIX cannot be empty");
        }

        Ok(Self {
            bind_addr: var("BIND_ADDR", "127.0.0.1:3000")
                .parse()
                .context("Invalid BIND_ADDR")?,
            redis_url: var("REDIS_URL", "redis://127.0.0.1:6379"),
            cache_backend: var("CACHE_BACKEND", "redis").parse()?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            windows: RevocationWindows {
                session_refresh: Duration::from_secs(session_days * 86400),
                sign_out: Duration::from_secs(sign_out_secs),
            },
            sweep_interval: Duration::from_secs(sweep_secs),
            store_timeout: Duration::from_millis(store_timeout_ms),
            key_prefix,
            admin_token: lookup("ADMIN_TOKEN")
                .filter(|token| !token.is_empty())
                .map(Zeroizing::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_match_cookie_and_revalidation_lifetimes() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.windows, RevocationWindows::default());
        assert_eq!(config.sweep_interval, Duration::from_secs(6 * 3600));
        assert_eq!(config.cache_backend, CacheBackendKind::Redis);
        assert!(config.database_url.is_none());
        assert!(config.admin_token.is_none());
        assert_eq!(config.key_prefix, "revocation");
    }

    #[test]
    fn windows_follow_the_command() {
        let config = config_from(&[
            ("SESSION_DURATION_DAYS", "1"),
            ("SIGN_OUT_WINDOW_SECS", "60"),
        ])
        .unwrap();

        assert_eq!(
            config.windows.for_command(Command::RefreshSession),
            Duration::from_secs(86400)
        );
        assert_eq!(
            config.windows.for_command(Command::SignOut),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config_from(&[("SIGN_OUT_WINDOW_SECS", "abc")]).is_err());
        assert!(config_from(&[("SIGN_OUT_WINDOW_SECS", "0")]).is_err());
        assert!(config_from(&[("CACHE_BACKEND", "memcached")]).is_err());
        assert!(config_from(&[("REVOCATION_KEY_PREFIX", "")]).is_err());
    }

    #[test]
    fn memory_backend_and_database_are_optional() {
        let config = config_from(&[
            ("CACHE_BACKEND", "Memory"),
            ("DATABASE_URL", "postgres://localhost/revocations"),
            ("ADMIN_TOKEN", "secret"),
        ])
        .unwrap();

        assert_eq!(config.cache_backend, CacheBackendKind::Memory);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/revocations")
        );
        assert_eq!(config.admin_token.as_deref().map(String::as_str), Some("secret"));
    }
}
