use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Shared key/value cache used for permission sets.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_cache(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    async fn set_cache(
        &self,
        key: &str,
        value: &str,
        expiry_seconds: u64,
    ) -> Result<(), anyhow::Error>;

    /// Atomically increments an integer key, creating it at 1.
    async fn incr(&self, key: &str) -> Result<i64, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl CacheStore for RedisService {
    async fn get_cache(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))
    }

    async fn set_cache(
        &self,
        key: &str,
        value: &str,
        expiry_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(expiry_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn incr(&self, key: &str) -> Result<i64, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment {}: {}", key, e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-process cache honouring expiries.
#[derive(Default)]
pub struct MockCache {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
    unavailable: Mutex<bool>,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, as if the cache server were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut flag) = self.unavailable.lock() {
            *flag = unavailable;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Option<Instant>)>>, anyhow::Error>
    {
        let down = *self
            .unavailable
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?;
        if down {
            return Err(anyhow::anyhow!("Mock cache unavailable"));
        }
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))
    }
}

#[async_trait]
impl CacheStore for MockCache {
    async fn get_cache(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut entries = self.entries()?;
        let expired = entries
            .get(key)
            .and_then(|(_, expires)| *expires)
            .is_some_and(|at| Instant::now() >= at);
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(v, _)| v.clone()))
    }

    async fn set_cache(
        &self,
        key: &str,
        value: &str,
        expiry_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let expires = Instant::now() + Duration::from_secs(expiry_seconds);
        self.entries()?
            .insert(key.to_string(), (value.to_string(), Some(expires)));
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, anyhow::Error> {
        let mut entries = self.entries()?;
        let current = entries
            .get(key)
            .map(|(v, _)| v.parse::<i64>())
            .transpose()
            .map_err(|e| anyhow::anyhow!("Value at {} is not an integer: {}", key, e))?
            .unwrap_or(0);
        let next = current + 1;
        entries.insert(key.to_string(), (next.to_string(), None));
        Ok(next)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.entries().map(|_| ())
    }
}
