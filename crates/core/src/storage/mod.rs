//! Persistence engines behind one [`Store`] contract.
//!
//! Every engine stores opaque bytes under a [`RecordKey`] but judges
//! freshness its own way:
//!
//! | Engine    | Freshness check                                   |
//! |-----------|---------------------------------------------------|
//! | Disk      | file modify-time + configured lifetime            |
//! | S3        | object `LastModified` + configured lifetime       |
//! | Redis     | native key TTL set with `EXPIREAT`                |
//! | Mongo     | no expiry; only a missing document is expired     |
//! | Cassandra | row TTL set at write time; rows vanish on expiry  |
//!
//! The engine is chosen once at startup with [`open_store`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::config::{StorageConfig, StorageType};

pub mod cassandra;
pub mod disk;
pub mod mongo;
pub mod redis;
pub mod s3;

pub use cassandra::CassandraStore;
pub use disk::DiskStore;
pub use mongo::MongoStore;
pub use redis::RedisStore;
pub use s3::S3Store;

/// Storage engine errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}: not found")]
    NotFound(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("{engine}: {message}")]
    Backend { engine: StorageType, message: String },

    #[error("invalid key {0:?}")]
    InvalidKey(String),

    #[error("invalid counter value under {0}")]
    InvalidCounter(String),

    #[error("store is closed")]
    Closed,
}

impl StoreError {
    pub fn backend(engine: StorageType, err: impl std::fmt::Display) -> Self {
        StoreError::Backend { engine, message: err.to_string() }
    }
}

/// Record families. Document and column stores keep one collection or
/// table per kind, flat stores prefix the key with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Serialized fetch responses.
    Cache,
    /// Per-user cookie jars.
    Cookies,
    /// Partial results keyed by payload hash, page and block.
    Intermediate,
    /// Request counters.
    Stats,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [RecordKind::Cache, RecordKind::Cookies, RecordKind::Intermediate, RecordKind::Stats];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Cache => "cache",
            RecordKind::Cookies => "cookies",
            RecordKind::Intermediate => "intermediate",
            RecordKind::Stats => "stats",
        }
    }
}

/// Address of one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub kind: RecordKind,
    pub key: String,
}

impl RecordKey {
    pub fn new(kind: RecordKind, key: impl Into<String>) -> Self {
        Self { kind, key: key.into() }
    }

    /// Cached response for a normalized URL.
    pub fn cache(url: impl Into<String>) -> Self {
        Self::new(RecordKind::Cache, url)
    }

    pub fn cookies(user_token: impl Into<String>) -> Self {
        Self::new(RecordKind::Cookies, user_token)
    }

    pub fn stats(identity: impl Into<String>) -> Self {
        Self::new(RecordKind::Stats, identity)
    }

    /// Intermediate block `block` of page `page` for a payload.
    pub fn intermediate(payload_hash: &str, page: u32, block: u32) -> Self {
        Self::new(RecordKind::Intermediate, format!("{payload_hash}-{page}-{block}"))
    }

    /// Split an intermediate key into payload hash, page and block.
    pub fn intermediate_parts(&self) -> Result<(&str, i32, i32), StoreError> {
        let invalid = || StoreError::InvalidKey(self.key.clone());
        let mut parts = self.key.rsplitn(3, '-');
        let block = parts.next().and_then(|b| b.parse().ok()).ok_or_else(invalid)?;
        let page = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let hash = parts.next().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        Ok((hash, page, block))
    }

    /// Single-namespace form, `kind:key`.
    pub fn flat(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.key)
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.flat())
    }
}

/// Far-future expiry used for records that should outlive any cache entry.
pub fn never_expires() -> DateTime<Utc> {
    Utc::now() + Duration::days(3650)
}

/// A persistence engine.
#[async_trait]
pub trait Store: Send + Sync {
    fn engine(&self) -> StorageType;

    /// Raw bytes under `key`, or `StoreError::NotFound`.
    async fn read(&self, key: &RecordKey) -> Result<Vec<u8>, StoreError>;

    /// Store `value` under `key`. `expires` is honored natively by engines
    /// with TTL support; the others judge freshness by modification time.
    async fn write(&self, key: &RecordKey, value: &[u8], expires: DateTime<Utc>) -> Result<(), StoreError>;

    /// True when `key` is missing or past its freshness window.
    async fn expired(&self, key: &RecordKey) -> bool;

    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError>;

    /// Remove every record this store owns.
    async fn delete_all(&self) -> Result<(), StoreError>;

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Add one to the decimal counter under `key`, returning the new value.
    ///
    /// Not atomic across processes unless the engine overrides it.
    async fn increment(&self, key: &RecordKey) -> Result<u64, StoreError> {
        let current = match self.read(key).await {
            Ok(bytes) => parse_counter(key, &bytes)?,
            Err(StoreError::NotFound(_)) => 0,
            Err(e) => return Err(e),
        };
        let next = current + 1;
        self.write(key, next.to_string().as_bytes(), never_expires()).await?;
        Ok(next)
    }
}

pub(crate) fn parse_counter(key: &RecordKey, bytes: &[u8]) -> Result<u64, StoreError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| StoreError::InvalidCounter(key.to_string()))
}

/// Open the engine selected in `config`.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn Store>, StoreError> {
    tracing::info!(engine = %config.kind, "opening storage engine");
    let store: Arc<dyn Store> = match config.kind {
        StorageType::Disk => Arc::new(DiskStore::open(&config.disk_dir, config.expire(), config.disk_cache_entries).await?),
        StorageType::S3 => Arc::new(S3Store::connect(config).await?),
        StorageType::Redis => Arc::new(RedisStore::connect(&config.redis_url, config.redis_pool_size)?),
        StorageType::Mongo => Arc::new(MongoStore::connect(&config.mongo_uri, &config.mongo_database).await?),
        StorageType::Cassandra => {
            Arc::new(CassandraStore::connect(&config.cassandra_nodes, &config.cassandra_keyspace, config.expire()).await?)
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intermediate_key_round_trip() {
        let key = RecordKey::intermediate("a1b2-c3", 2, 7);
        assert_eq!(key.key, "a1b2-c3-2-7");
        assert_eq!(key.intermediate_parts().unwrap(), ("a1b2-c3", 2, 7));
    }

    #[test]
    fn test_intermediate_key_invalid() {
        assert!(matches!(RecordKey::new(RecordKind::Intermediate, "abc").intermediate_parts(), Err(StoreError::InvalidKey(_))));
        assert!(matches!(RecordKey::new(RecordKind::Intermediate, "-1-2").intermediate_parts(), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_flat_key() {
        assert_eq!(RecordKey::cache("http://example.com").flat(), "cache:http://example.com");
        assert_eq!(RecordKey::stats("alice").to_string(), "stats:alice");
    }

    #[test]
    fn test_parse_counter() {
        let key = RecordKey::stats("x");
        assert_eq!(parse_counter(&key, b"41").unwrap(), 41);
        assert!(matches!(parse_counter(&key, b"many"), Err(StoreError::InvalidCounter(_))));
    }
}
