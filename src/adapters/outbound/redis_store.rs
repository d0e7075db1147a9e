//! Redis Key-Value Store
//!
//! Implements KeyValueStore on a Redis endpoint through a multiplexed
//! connection manager. The handle is created once at startup and shared
//! by every task; each command is bounded by a deadline.

use crate::domain::ports::{KeyValueStore, StoreError, MAX_TTL};
use crate::domain::value_objects::KeyTtl;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Cmd, FromRedisValue, IntoConnectionInfo};
use std::future::Future;
use std::time::Duration;

/// Connection settings for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://:secret@10.0.0.5:6379`
    pub url: String,
    /// Logical database index, overriding any index in the URL
    pub db: i64,
    /// Deadline applied to connecting and to every command
    pub op_timeout: Duration,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            db: 0,
            op_timeout: Duration::from_secs(30),
        }
    }

    /// Set the database index.
    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Set the per-command deadline.
    pub fn op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }
}

/// Redis-backed key-value store.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    /// Parse the connection URL and connect.
    ///
    /// Fails on a malformed URL or when the endpoint cannot be reached
    /// within the configured deadline.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .context("failed to parse Redis connection string")?;
        info.redis.db = config.db;

        let client = redis::Client::open(info).context("invalid Redis connection info")?;
        let conn = tokio::time::timeout(config.op_timeout, ConnectionManager::new(client))
            .await
            .with_context(|| format!("Redis connect timed out after {:?}", config.op_timeout))?
            .context("failed to connect to Redis")?;

        Ok(Self {
            conn,
            op_timeout: config.op_timeout,
        })
    }

    /// Run a command under the store deadline.
    async fn query<T: FromRedisValue>(&self, cmd: Cmd) -> Result<T, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(map_redis_error),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }
}

/// Translate a client error into the port's error type.
fn map_redis_error(err: redis::RedisError) -> StoreError {
    match err.kind() {
        redis::ErrorKind::ExtensionError if err.code() == Some("WRONGTYPE") => {
            StoreError::WrongType(err.detail().unwrap_or_default().to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

/// Attach the key to a type mismatch reported by the server.
fn for_key(err: StoreError, key: &str) -> StoreError {
    match err {
        StoreError::WrongType(_) => StoreError::WrongType(key.to_string()),
        other => other,
    }
}

/// Millisecond TTL argument; never zero for a non-zero duration.
///
/// Redis stores expiries as signed 64-bit milliseconds, so longer leases
/// are rejected rather than truncated.
fn ttl_millis(ttl: Duration) -> Result<u64, StoreError> {
    if ttl.is_zero() || ttl > MAX_TTL {
        return Err(StoreError::InvalidTtl);
    }
    let ms = u64::try_from(ttl.as_millis()).map_err(|_| StoreError::InvalidTtl)?;
    Ok(ms.max(1))
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.query(redis::cmd("GET").arg(key).clone())
            .await
            .map_err(|e| for_key(e, key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let ms = ttl_millis(ttl)?;
        self.query(redis::cmd("PSETEX").arg(key).arg(ms).arg(value).clone())
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed: i64 = self.query(redis::cmd("DEL").arg(key).clone()).await?;
        Ok(removed > 0)
    }

    async fn remaining_ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let ms: i64 = self.query(redis::cmd("PTTL").arg(key).clone()).await?;
        Ok(KeyTtl::from_pttl(ms))
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let ms = ttl_millis(ttl)?;
        let applied: i64 = self
            .query(redis::cmd("PEXPIRE").arg(key).arg(ms).clone())
            .await?;
        Ok(applied == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let count: i64 = self.query(redis::cmd("EXISTS").arg(key).clone()).await?;
        Ok(count > 0)
    }

    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64, StoreError> {
        self.query(redis::cmd("DECRBY").arg(key).arg(amount).clone())
            .await
            .map_err(|e| match e {
                StoreError::Backend(msg) if msg.contains("not an integer") => {
                    StoreError::NotAnInteger(key.to_string())
                }
                other => for_key(other, key),
            })
    }

    async fn set_add(&self, key: &str, members: &[&str]) -> Result<usize, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let added: i64 = self
            .query(redis::cmd("SADD").arg(key).arg(members).clone())
            .await
            .map_err(|e| for_key(e, key))?;
        Ok(added.max(0) as usize)
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let found: i64 = self
            .query(redis::cmd("SISMEMBER").arg(key).arg(member).clone())
            .await
            .map_err(|e| for_key(e, key))?;
        Ok(found == 1)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let pong: String = self.query(redis::cmd("PING").clone()).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("unexpected PING reply: {}", pong)))
        }
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}
