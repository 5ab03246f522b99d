//! Session cache shared between server instances through Redis

use std::{fmt, time::Duration};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, FromRedisValue};
use tokio::time::timeout;
use tollgate_clock::DurationSecs;

use super::{SessionCache, SessionKeyRef};
use crate::error::{session_cache_error, SessionCacheError};

/// Key prefix used when none is configured
pub const DEFAULT_PREFIX: &str = "tollgate-v1-";

/// Bound on connecting and on each command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A session cache backed by Redis
///
/// `take` uses `GETDEL`, which requires Redis 6.2 or later.
#[derive(Clone)]
pub struct RedisSessionCache {
    connection: ConnectionManager,
    prefix: String,
    timeout: Duration,
}

impl fmt::Debug for RedisSessionCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RedisSessionCache")
            .field("prefix", &self.prefix)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisSessionCache {
    /// Connects to the Redis server at `url`
    ///
    /// # Errors
    ///
    /// The URL is invalid or the server cannot be reached within the
    /// default timeout.
    pub async fn connect(url: &str) -> Result<Self, SessionCacheError> {
        Self::connect_with(url, DEFAULT_PREFIX, DEFAULT_TIMEOUT).await
    }

    /// Connects with a custom key prefix and timeout
    ///
    /// # Errors
    ///
    /// The URL is invalid or the server cannot be reached within `timeout`.
    pub async fn connect_with(
        url: &str,
        prefix: impl Into<String>,
        timeout_after: Duration,
    ) -> Result<Self, SessionCacheError> {
        let client = Client::open(url).map_err(session_cache_error)?;

        let connection = timeout(timeout_after, ConnectionManager::new(client))
            .await
            .map_err(|_| session_cache_error("timed out connecting to redis"))?
            .map_err(session_cache_error)?;

        let prefix = prefix.into();
        tracing::info!(%prefix, "connected to redis session cache");

        Ok(Self {
            connection,
            prefix,
            timeout: timeout_after,
        })
    }

    #[allow(trivial_casts)]
    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, SessionCacheError> {
        let mut connection = self.connection.clone();

        timeout(self.timeout, cmd.query_async::<T>(&mut connection))
            .await
            .map_err(|_| session_cache_error("redis command timed out"))?
            .map_err(|e| {
                tracing::warn!(error = &e as &dyn std::error::Error, "redis command failed");
                session_cache_error(e)
            })
    }
}

fn namespaced(prefix: &str, key: &SessionKeyRef) -> String {
    format!("{}{}", prefix, key.as_str())
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn get(&self, key: &SessionKeyRef) -> Result<Option<String>, SessionCacheError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(namespaced(&self.prefix, key));
        self.query(&cmd).await
    }

    async fn set(
        &self,
        key: &SessionKeyRef,
        value: &str,
        ttl: DurationSecs,
    ) -> Result<(), SessionCacheError> {
        if ttl.0 == 0 {
            // Redis rejects `EX 0`; an entry that expires immediately is no entry.
            self.delete(key).await?;
            return Ok(());
        }

        let mut cmd = redis::cmd("SET");
        cmd.arg(namespaced(&self.prefix, key))
            .arg(value)
            .arg("EX")
            .arg(ttl.0);
        self.query(&cmd).await
    }

    async fn delete(&self, key: &SessionKeyRef) -> Result<bool, SessionCacheError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(namespaced(&self.prefix, key));
        let removed: i64 = self.query(&cmd).await?;
        Ok(removed > 0)
    }

    async fn take(&self, key: &SessionKeyRef) -> Result<Option<String>, SessionCacheError> {
        let mut cmd = redis::cmd("GETDEL");
        cmd.arg(namespaced(&self.prefix, key));
        self.query(&cmd).await
    }
}
