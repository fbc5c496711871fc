//! Application state and configuration.

use nimbus_store::cache::QueryCache;
use nimbus_store::Store;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "127.0.0.1:5000").
    pub bind_addr: String,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Whether the query-result cache is active at all.
    pub cache_enabled: bool,

    /// Maximum cached pages.
    pub cache_capacity: u64,

    /// Safety-net TTL; also the documented staleness bound for readers
    /// whose writers run in another process.
    pub cache_ttl: Duration,

    /// Connection pool sizing.
    pub db_pool_size: usize,
    pub db_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `NIMBUS_DATABASE_URL`: PostgreSQL connection URL
    ///
    /// Optional environment variables:
    /// - `NIMBUS_BIND_ADDR`: Server bind address (default: "127.0.0.1:5000")
    /// - `NIMBUS_CACHE_ENABLED`: Enable the query cache (default: true)
    /// - `NIMBUS_CACHE_CAPACITY`: Maximum cached pages (default: 1024)
    /// - `NIMBUS_CACHE_TTL_SECS`: Entry lifetime in seconds (default: 60)
    /// - `NIMBUS_DB_POOL_SIZE` / `NIMBUS_DB_TIMEOUT_SECS`: pool sizing
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            std::env::var("NIMBUS_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:5000".to_string());

        let database_url = std::env::var("NIMBUS_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("NIMBUS_DATABASE_URL environment variable is required"))?;

        let cache_enabled = env_parsed("NIMBUS_CACHE_ENABLED", true)?;
        let cache_capacity: u64 = env_parsed("NIMBUS_CACHE_CAPACITY", 1024)?;
        let cache_ttl = Duration::from_secs(env_parsed("NIMBUS_CACHE_TTL_SECS", 60u64)?);

        let db_pool_size: usize = env_parsed("NIMBUS_DB_POOL_SIZE", 16)?;
        let db_timeout = Duration::from_secs(env_parsed("NIMBUS_DB_TIMEOUT_SECS", 30u64)?);

        tracing::info!(
            bind_addr = %bind_addr,
            cache_enabled,
            cache_capacity,
            cache_ttl_secs = cache_ttl.as_secs(),
            "configuration loaded"
        );

        Ok(Self {
            bind_addr,
            database_url,
            cache_enabled,
            cache_capacity,
            cache_ttl,
            db_pool_size,
            db_timeout,
        })
    }
}

#[cfg(test)]
impl Config {
    /// In-memory configuration for handler tests.
    pub(crate) fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            database_url: String::new(),
            cache_enabled: true,
            cache_capacity: 1024,
            cache_ttl: Duration::from_secs(60),
            db_pool_size: 4,
            db_timeout: Duration::from_secs(5),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{name}: cannot parse '{raw}'")),
        Err(_) => Ok(default),
    }
}

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Record store backing every query.
    pub store: Arc<dyn Store>,

    /// Query-result cache; `None` when disabled. Every handler treats a
    /// disabled cache exactly like a miss.
    pub cache: Option<Arc<QueryCache>>,

    /// Application configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Create application state from a store and configuration.
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        let cache = (config.cache_enabled && config.cache_capacity > 0)
            .then(|| Arc::new(QueryCache::new(config.cache_capacity, config.cache_ttl)));
        if cache.is_none() {
            tracing::info!("query cache disabled");
        }
        Self {
            store,
            cache,
            config: Arc::new(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_store::MemStore;

    fn config(enabled: bool, capacity: u64) -> Config {
        Config {
            cache_enabled: enabled,
            cache_capacity: capacity,
            ..Config::for_tests()
        }
    }

    #[test]
    fn test_cache_wiring_follows_config() {
        let state = AppState::new(Arc::new(MemStore::new()), config(true, 1024));
        assert!(state.cache.is_some());

        let state = AppState::new(Arc::new(MemStore::new()), config(false, 1024));
        assert!(state.cache.is_none());

        // Capacity zero means disabled no matter the flag.
        let state = AppState::new(Arc::new(MemStore::new()), config(true, 0));
        assert!(state.cache.is_none());
    }
}
