//! Redis store over a deadpool connection pool.
//!
//! Expiry is native: each write is followed by `EXPIREAT` in the same
//! transaction and freshness is read back with `TTL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};

use super::{RecordKey, RecordKind, Store, StoreError};
use crate::config::StorageType;

pub struct RedisStore {
    pool: Pool,
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::backend(StorageType::Redis, err)
}

impl RedisStore {
    /// Create a pool of at most `pool_size` connections. Connections are
    /// opened lazily on first use.
    pub fn connect(url: &str, pool_size: usize) -> Result<Self, StoreError> {
        let mut config = Config::from_url(url);
        config.pool = Some(PoolConfig::new(pool_size));
        let pool = config.create_pool(Some(Runtime::Tokio1)).map_err(backend)?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        self.pool.get().await.map_err(backend)
    }
}

#[async_trait]
impl Store for RedisStore {
    fn engine(&self) -> StorageType {
        StorageType::Redis
    }

    async fn read(&self, key: &RecordKey) -> Result<Vec<u8>, StoreError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key.flat()).await.map_err(backend)?;
        value.ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn write(&self, key: &RecordKey, value: &[u8], expires: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let flat = key.flat();
        let () = redis::pipe()
            .atomic()
            .set(&flat, value)
            .ignore()
            .expire_at(&flat, expires.timestamp())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    /// Missing keys (`TTL` -2) and keys at or past expiry are expired;
    /// keys without a TTL (-1) never are.
    async fn expired(&self, key: &RecordKey) -> bool {
        let Ok(mut conn) = self.conn().await else {
            return true;
        };
        match conn.ttl::<_, i64>(key.flat()).await {
            Ok(ttl) => !(ttl > 0 || ttl == -1),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "redis ttl failed");
                true
            }
        }
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(key.flat()).await.map_err(backend)?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        for kind in RecordKind::ALL {
            let keys: Vec<String> = {
                let mut iter = conn.scan_match::<_, String>(format!("{}:*", kind.as_str())).await.map_err(backend)?;
                let mut keys = Vec::new();
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
                keys
            };
            if !keys.is_empty() {
                let _: i64 = conn.del(keys).await.map_err(backend)?;
            }
        }
        Ok(())
    }

    /// Atomic `INCR`.
    async fn increment(&self, key: &RecordKey) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(key.flat(), 1).await.map_err(backend)?;
        u64::try_from(value).map_err(|_| StoreError::InvalidCounter(key.to_string()))
    }
}
