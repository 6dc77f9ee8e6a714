//! Response cache in front of the fetch chain.
//!
//! A fresh record short-circuits the fetch. Misses are fetched and, when
//! the response is cacheable, written with its computed expiry. Two
//! concurrent misses for one URL both fetch and both write; the last write
//! wins.
//!
//! Only bodiless GETs share the page cache. HEAD lookups and form posts go
//! straight through and are never written.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use trawl_core::{Error, FetchRequest, FetchResponse, RecordKey, Store};

use super::Layer;
use crate::service::FetchService;

pub struct StorageMiddleware {
    store: Arc<dyn Store>,
    inner: Arc<dyn FetchService>,
}

impl StorageMiddleware {
    pub fn new(store: Arc<dyn Store>, inner: Arc<dyn FetchService>) -> Self {
        Self { store, inner }
    }

    async fn cached(&self, key: &RecordKey) -> Option<FetchResponse> {
        if self.store.expired(key).await {
            return None;
        }
        let bytes = match self.store.read(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(key = %key.flat(), error = %e, "cache read failed");
                return None;
            }
        };
        match FetchResponse::from_bytes(&bytes) {
            Ok(resp) if !resp.is_fresh(Utc::now()) => {
                tracing::debug!(key = %key.flat(), expires = ?resp.expires, "cache record is stale");
                None
            }
            Ok(resp) => Some(resp),
            Err(e) => {
                tracing::warn!(key = %key.flat(), error = %e, "discarding unreadable cache record");
                None
            }
        }
    }
}

#[async_trait]
impl FetchService for StorageMiddleware {
    async fn response(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        if !request.is_plain_get() {
            return self.inner.response(request).await?.ensure_found();
        }
        let key = RecordKey::cache(request.cache_key());
        if let Some(resp) = self.cached(&key).await {
            tracing::debug!(url = request.url(), "served from cache");
            return resp.ensure_found();
        }

        let resp = self.inner.response(request).await?;
        if resp.is_cacheable() {
            match resp.to_bytes() {
                Ok(bytes) => {
                    if let Err(e) = self.store.write(&key, &bytes, resp.expires).await {
                        tracing::warn!(url = request.url(), error = %e, "cache write failed");
                    }
                }
                Err(e) => tracing::warn!(url = request.url(), error = %e, "failed to serialize response"),
            }
        } else {
            tracing::debug!(url = request.url(), reasons = ?resp.reasons_not_cacheable, "response not cacheable");
        }
        resp.ensure_found()
    }
}

pub struct StorageLayer {
    store: Arc<dyn Store>,
}

impl StorageLayer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl Layer for StorageLayer {
    fn layer(&self, inner: Arc<dyn FetchService>) -> Arc<dyn FetchService> {
        Arc::new(StorageMiddleware::new(self.store.clone(), inner))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use trawl_core::storage::DiskStore;

    use super::*;
    use crate::service::testing::StubService;

    async fn disk() -> (tempfile::TempDir, Arc<dyn Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path(), Duration::from_secs(3600), 16).await.unwrap();
        (dir, Arc::new(store))
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let (_dir, store) = disk().await;
        let stub = Arc::new(StubService::page(200, "<p>cached</p>"));
        let service = StorageLayer::new(store.clone()).layer(stub.clone());

        let request = FetchRequest::base("http://example.com/page/");
        assert_eq!(service.fetch(&request).await.unwrap(), "<p>cached</p>");
        assert_eq!(service.fetch(&FetchRequest::base("http://example.com/page")).await.unwrap(), "<p>cached</p>");
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_cached_and_surfaced() {
        let (_dir, store) = disk().await;
        let stub = Arc::new(StubService::page(404, "missing"));
        let service = StorageLayer::new(store.clone()).layer(stub.clone());

        let request = FetchRequest::base("http://example.com/gone");
        assert!(matches!(service.response(&request).await, Err(Error::NotFound(_))));
        assert!(matches!(service.response(&request).await, Err(Error::NotFound(_))));
        assert_eq!(stub.calls(), 1);
        assert!(!store.expired(&RecordKey::cache(request.cache_key())).await);
    }

    #[tokio::test]
    async fn test_uncacheable_response_is_not_written() {
        let (_dir, store) = disk().await;
        let stub = Arc::new(StubService::new(|request| {
            let mut resp = FetchResponse::new(request.kind(), request.url(), 200, "<p>private</p>");
            resp.response_headers.append("cache-control", "no-store");
            resp.set_cache_info(Utc::now());
            Ok(resp)
        }));
        let service = StorageLayer::new(store.clone()).layer(stub.clone());

        let request = FetchRequest::base("http://example.com/private");
        service.fetch(&request).await.unwrap();
        service.fetch(&request).await.unwrap();
        assert_eq!(stub.calls(), 2);
        assert!(store.expired(&RecordKey::cache(request.cache_key())).await);
    }

    #[tokio::test]
    async fn test_stale_record_is_refetched() {
        let (_dir, store) = disk().await;
        let request = FetchRequest::base("http://example.com/old");
        let mut stale = FetchResponse::new(request.kind(), request.url(), 200, "<p>old</p>");
        stale.response_headers.append("cache-control", "max-age=60");
        stale.set_cache_info(Utc::now() - chrono::Duration::hours(2));
        let key = RecordKey::cache(request.cache_key());
        store.write(&key, &stale.to_bytes().unwrap(), stale.expires).await.unwrap();

        let stub = Arc::new(StubService::page(200, "<p>new</p>"));
        let service = StorageLayer::new(store.clone()).layer(stub.clone());
        assert_eq!(service.fetch(&request).await.unwrap(), "<p>new</p>");
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_head_and_post_bypass_the_page_cache() {
        let (_dir, store) = disk().await;
        let stub = Arc::new(StubService::new(|request| {
            let body = if request.method() == "GET" { "<p>page</p>" } else { "" };
            let mut resp = FetchResponse::new(request.kind(), request.url(), 200, body);
            resp.method = request.method().to_string();
            resp.response_headers.append("cache-control", "max-age=3600");
            resp.set_cache_info(Utc::now());
            Ok(resp)
        }));
        let service = StorageLayer::new(store.clone()).layer(stub.clone());

        let page = FetchRequest::base("http://example.com/page");
        let head = page.clone().with_method("HEAD");
        let post: FetchRequest =
            serde_json::from_str(r#"{"type":"base","url":"http://example.com/page","formData":"q=1"}"#).unwrap();

        assert_eq!(service.fetch(&head).await.unwrap(), "");
        service.fetch(&post).await.unwrap();
        service.fetch(&post).await.unwrap();
        assert!(store.expired(&RecordKey::cache(page.cache_key())).await);

        assert_eq!(service.fetch(&page).await.unwrap(), "<p>page</p>");
        assert_eq!(service.fetch(&head).await.unwrap(), "");
        assert_eq!(service.fetch(&page).await.unwrap(), "<p>page</p>");
        assert_eq!(stub.calls(), 5);
    }

    #[tokio::test]
    async fn test_fetch_errors_are_not_cached() {
        let (_dir, store) = disk().await;
        let stub = Arc::new(StubService::new(|request| Err(Error::Forbidden(request.url().to_string()))));
        let service = StorageLayer::new(store).layer(stub.clone());

        let request = FetchRequest::base("http://example.com/denied");
        assert!(matches!(service.fetch(&request).await, Err(Error::Forbidden(_))));
        assert!(matches!(service.fetch(&request).await, Err(Error::Forbidden(_))));
        assert_eq!(stub.calls(), 2);
    }
}
