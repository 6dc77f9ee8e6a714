//! Flat-file store with an in-memory LRU read cache.
//!
//! Records live at `<base>/<kind>/<sha256(key)>`. Freshness is the file's
//! modify time plus a fixed lifetime; the per-record expiry passed to
//! `write` is not consulted.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use tokio::sync::Mutex;

use super::{RecordKey, Store, StoreError};
use crate::cache::digest;
use crate::config::StorageType;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct DiskStore {
    base_dir: PathBuf,
    lifetime: Duration,
    memory: Option<Mutex<LruCache<RecordKey, Vec<u8>>>>,
}

impl DiskStore {
    /// Open (creating if needed) a store rooted at `base_dir`. A zero
    /// `cache_entries` disables the read cache.
    pub async fn open(base_dir: impl AsRef<Path>, lifetime: Duration, cache_entries: usize) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir).await?;
        let memory = NonZeroUsize::new(cache_entries).map(|cap| Mutex::new(LruCache::new(cap)));
        tracing::debug!(dir = %base_dir.display(), lifetime_secs = lifetime.as_secs(), "disk store ready");
        Ok(Self { base_dir, lifetime, memory })
    }

    fn path(&self, key: &RecordKey) -> PathBuf {
        self.base_dir.join(key.kind.as_str()).join(digest(&key.key))
    }

    async fn remember(&self, key: &RecordKey, value: &[u8]) {
        if let Some(memory) = &self.memory {
            memory.lock().await.put(key.clone(), value.to_vec());
        }
    }

    async fn forget(&self, key: &RecordKey) {
        if let Some(memory) = &self.memory {
            memory.lock().await.pop(key);
        }
    }
}

#[async_trait]
impl Store for DiskStore {
    fn engine(&self) -> StorageType {
        StorageType::Disk
    }

    async fn read(&self, key: &RecordKey) -> Result<Vec<u8>, StoreError> {
        if let Some(memory) = &self.memory
            && let Some(value) = memory.lock().await.get(key)
        {
            return Ok(value.clone());
        }

        let value = match tokio::fs::read(self.path(key)).await {
            Ok(value) => value,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NotFound(key.to_string())),
            Err(e) => return Err(e.into()),
        };
        self.remember(key, &value).await;
        Ok(value)
    }

    async fn write(&self, key: &RecordKey, value: &[u8], _expires: DateTime<Utc>) -> Result<(), StoreError> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never observe a partial file.
        let tmp = path.with_extension(format!("tmp{}", TMP_COUNTER.fetch_add(1, Ordering::Relaxed)));
        tokio::fs::write(&tmp, value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        self.remember(key, value).await;
        Ok(())
    }

    async fn expired(&self, key: &RecordKey) -> bool {
        let modified = match tokio::fs::metadata(self.path(key)).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return true,
        };
        SystemTime::now().duration_since(modified).unwrap_or_default() >= self.lifetime
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        self.forget(key).await;
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        if let Some(memory) = &self.memory {
            memory.lock().await.clear();
        }
        match tokio::fs::remove_dir_all(&self.base_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RecordKind, never_expires};

    async fn store(dir: &Path, lifetime: Duration) -> DiskStore {
        DiskStore::open(dir, lifetime, 8).await.unwrap()
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_secs(60)).await;
        let result = store.read(&RecordKey::cache("http://example.com")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_expired_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_secs(60)).await;
        let key = RecordKey::cache("http://example.com");

        assert!(store.expired(&key).await);
        store.write(&key, b"<html></html>", never_expires()).await.unwrap();
        assert!(!store.expired(&key).await);
    }

    #[tokio::test]
    async fn test_zero_lifetime_is_always_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::ZERO).await;
        let key = RecordKey::cache("http://example.com");
        store.write(&key, b"x", never_expires()).await.unwrap();
        assert!(store.expired(&key).await);
    }

    #[tokio::test]
    async fn test_round_trip_without_memory_cache() {
        let dir = tempfile::tempdir().unwrap();
        let key = RecordKey::cache("http://example.com/page?q=1");
        let value = r#"{"html":"<p>é</p>"}"#.as_bytes().to_vec();

        let writer = DiskStore::open(dir.path(), Duration::from_secs(60), 0).await.unwrap();
        writer.write(&key, &value, never_expires()).await.unwrap();

        let reader = DiskStore::open(dir.path(), Duration::from_secs(60), 0).await.unwrap();
        assert_eq!(reader.read(&key).await.unwrap(), value);
    }

    #[tokio::test]
    async fn test_kinds_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_secs(60)).await;
        store.write(&RecordKey::new(RecordKind::Cache, "k"), b"cache", never_expires()).await.unwrap();
        store.write(&RecordKey::new(RecordKind::Cookies, "k"), b"cookies", never_expires()).await.unwrap();
        assert_eq!(store.read(&RecordKey::new(RecordKind::Cache, "k")).await.unwrap(), b"cache");
        assert_eq!(store.read(&RecordKey::new(RecordKind::Cookies, "k")).await.unwrap(), b"cookies");
    }

    #[tokio::test]
    async fn test_delete_and_delete_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_secs(60)).await;
        let a = RecordKey::cache("a");
        let b = RecordKey::cache("b");
        store.write(&a, b"1", never_expires()).await.unwrap();
        store.write(&b, b"2", never_expires()).await.unwrap();

        store.delete(&a).await.unwrap();
        assert!(matches!(store.read(&a).await, Err(StoreError::NotFound(_))));
        store.delete(&a).await.unwrap();

        store.delete_all().await.unwrap();
        assert!(matches!(store.read(&b).await, Err(StoreError::NotFound(_))));
        assert!(store.expired(&b).await);
    }

    #[tokio::test]
    async fn test_increment_uses_default_read_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_secs(60)).await;
        let key = RecordKey::stats("alice");
        assert_eq!(store.increment(&key).await.unwrap(), 1);
        assert_eq!(store.increment(&key).await.unwrap(), 2);
        assert_eq!(store.read(&key).await.unwrap(), b"2");
    }
}
