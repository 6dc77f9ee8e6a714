//! The fetch service: picks a backend by request variant.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cookie_store::CookieStore;
use trawl_core::{Error, FetchRequest, FetchResponse, RecordKey, Store, StoreError};
use url::Url;

use crate::fetcher::{Fetcher, cookies};

/// One fetch operation, shared by the service and every middleware.
#[async_trait]
pub trait FetchService: Send + Sync {
    /// Full response with cache metadata.
    async fn response(&self, request: &FetchRequest) -> Result<FetchResponse, Error>;

    /// Page HTML only. A 404 surfaces as [`Error::NotFound`].
    async fn fetch(&self, request: &FetchRequest) -> Result<String, Error> {
        Ok(self.response(request).await?.ensure_found()?.html)
    }
}

/// Per-user cookie jars kept in the active store.
struct CookieJars {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl CookieJars {
    async fn load(&self, token: &str) -> CookieStore {
        let bytes = match self.store.read(&RecordKey::cookies(token)).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => return CookieStore::default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load stored cookies");
                return CookieStore::default();
            }
        };
        cookie_store::serde::json::load_all(bytes.as_slice()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "discarding unreadable stored cookies");
            CookieStore::default()
        })
    }

    /// Session cookies are kept too: a user's jar outlives one fetch.
    async fn save(&self, token: &str, jar: &CookieStore) {
        let mut bytes = Vec::new();
        if let Err(e) = cookie_store::serde::json::save_incl_expired_and_nonpersistent(jar, &mut bytes) {
            tracing::warn!(error = %e, "failed to serialize cookies");
            return;
        }
        let expires = Utc::now() + chrono::Duration::seconds(self.ttl.as_secs() as i64);
        if let Err(e) = self.store.write(&RecordKey::cookies(token), &bytes, expires).await {
            tracing::warn!(error = %e, "failed to save cookies");
        }
    }
}

/// Innermost service dispatching to the configured fetchers.
pub struct Service {
    base: Arc<dyn Fetcher>,
    splash: Option<Arc<dyn Fetcher>>,
    chrome: Option<Arc<dyn Fetcher>>,
    cookies: Option<CookieJars>,
}

impl Service {
    pub fn new(base: Arc<dyn Fetcher>) -> Self {
        Self { base, splash: None, chrome: None, cookies: None }
    }

    pub fn with_splash(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.splash = Some(fetcher);
        self
    }

    pub fn with_chrome(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.chrome = Some(fetcher);
        self
    }

    /// Keep cookies of requests carrying a user token in `store`.
    pub fn with_cookie_store(mut self, store: Arc<dyn Store>, ttl: Duration) -> Self {
        self.cookies = Some(CookieJars { store, ttl });
        self
    }

    fn fetcher_for(&self, request: &FetchRequest) -> Result<&Arc<dyn Fetcher>, Error> {
        match request {
            FetchRequest::Base(_) => Ok(&self.base),
            FetchRequest::Rendered(_) => {
                self.splash.as_ref().ok_or_else(|| Error::BadRequest("splash fetcher is not configured".into()))
            }
            FetchRequest::Browser(_) => {
                self.chrome.as_ref().ok_or_else(|| Error::BadRequest("chrome fetcher is not configured".into()))
            }
        }
    }

    /// Release every fetcher.
    pub async fn close(&self) {
        self.base.close().await;
        for fetcher in [&self.splash, &self.chrome].into_iter().flatten() {
            fetcher.close().await;
        }
    }
}

#[async_trait]
impl FetchService for Service {
    async fn response(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let fetcher = self.fetcher_for(request)?;

        let session = match (&self.cookies, request.user_token()) {
            (Some(store), Some(token)) => Some((store, token)),
            _ => None,
        };
        let Some((store, token)) = session else {
            return fetcher.fetch(request).await;
        };

        let url = request.parsed_url()?;
        let mut jar = store.load(token).await;
        let outgoing = cookies::for_request(&jar, &url, request.cookies());
        let resp = fetcher.fetch(&request.clone().with_cookies(outgoing)).await?;
        if !resp.cookies.is_empty() {
            let origin = Url::parse(&resp.url).unwrap_or(url);
            cookies::store_response(&mut jar, &origin, &resp.cookies);
            store.save(token, &jar).await;
        }
        Ok(resp)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::testing::StubService;
    use super::*;
    use trawl_core::{Cookie, FetcherKind};
    use trawl_core::storage::DiskStore;

    /// Fetcher that records the cookies it was given and sets one.
    struct CookieFetcher {
        seen: Mutex<Vec<Vec<Cookie>>>,
    }

    #[async_trait]
    impl Fetcher for CookieFetcher {
        fn kind(&self) -> FetcherKind {
            FetcherKind::Base
        }

        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
            self.seen.lock().unwrap().push(request.cookies().to_vec());
            let mut resp = FetchResponse::new(FetcherKind::Base, request.url(), 200, "<html></html>");
            resp.cookies = vec![Cookie::new("session", "s1")];
            Ok(resp)
        }
    }

    #[tokio::test]
    async fn test_default_fetch_maps_404() {
        let stub = StubService::page(404, "gone");
        let result = stub.fetch(&FetchRequest::base("http://example.com/x")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        let stub = StubService::page(200, "<p>ok</p>");
        assert_eq!(stub.fetch(&FetchRequest::base("http://example.com")).await.unwrap(), "<p>ok</p>");
    }

    #[tokio::test]
    async fn test_unconfigured_backend_is_bad_request() {
        let service = Service::new(Arc::new(CookieFetcher { seen: Mutex::new(Vec::new()) }));
        let result = service.response(&FetchRequest::rendered("http://example.com")).await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
        let result = service.response(&FetchRequest::browser("http://example.com")).await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_user_cookies_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(DiskStore::open(dir.path(), Duration::from_secs(60), 8).await.unwrap());
        let fetcher = Arc::new(CookieFetcher { seen: Mutex::new(Vec::new()) });
        let service = Service::new(fetcher.clone()).with_cookie_store(store.clone(), Duration::from_secs(600));

        let request: FetchRequest =
            serde_json::from_str(r#"{"type":"base","url":"http://example.com","userToken":"alice"}"#).unwrap();
        service.response(&request).await.unwrap();
        service.response(&request).await.unwrap();

        let seen = fetcher.seen.lock().unwrap();
        assert!(seen[0].is_empty());
        assert_eq!(seen[1], vec![Cookie::new("session", "s1")]);

        let bytes = store.read(&RecordKey::cookies("alice")).await.unwrap();
        let jar = cookie_store::serde::json::load_all(bytes.as_slice()).unwrap();
        assert_eq!(jar.iter_any().count(), 1);
    }

    #[tokio::test]
    async fn test_users_do_not_share_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(DiskStore::open(dir.path(), Duration::from_secs(60), 8).await.unwrap());
        let fetcher = Arc::new(CookieFetcher { seen: Mutex::new(Vec::new()) });
        let service = Service::new(fetcher.clone()).with_cookie_store(store, Duration::from_secs(600));

        let as_user = |token: &str| -> FetchRequest {
            serde_json::from_str(&format!(r#"{{"type":"base","url":"http://example.com","userToken":"{token}"}}"#))
                .unwrap()
        };
        service.response(&as_user("alice")).await.unwrap();
        service.response(&as_user("bob")).await.unwrap();
        service.response(&FetchRequest::base("http://example.com")).await.unwrap();
        service.response(&as_user("alice")).await.unwrap();

        let seen = fetcher.seen.lock().unwrap();
        assert!(seen[1].is_empty());
        assert!(seen[2].is_empty());
        assert_eq!(seen[3], vec![Cookie::new("session", "s1")]);
    }

    #[tokio::test]
    async fn test_stored_cookies_follow_their_host() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(DiskStore::open(dir.path(), Duration::from_secs(60), 8).await.unwrap());
        let fetcher = Arc::new(CookieFetcher { seen: Mutex::new(Vec::new()) });
        let service = Service::new(fetcher.clone()).with_cookie_store(store, Duration::from_secs(600));

        let at = |url: &str| -> FetchRequest {
            serde_json::from_str(&format!(r#"{{"type":"base","url":"{url}","userToken":"alice"}}"#)).unwrap()
        };
        service.response(&at("http://example.com/")).await.unwrap();
        service.response(&at("http://other.org/")).await.unwrap();
        service.response(&at("http://example.com/next")).await.unwrap();

        let seen = fetcher.seen.lock().unwrap();
        assert!(seen[1].is_empty());
        assert_eq!(seen[2], vec![Cookie::new("session", "s1")]);
    }

    #[tokio::test]
    async fn test_anonymous_requests_skip_cookie_store() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(DiskStore::open(dir.path(), Duration::from_secs(60), 8).await.unwrap());
        let service = Service::new(Arc::new(CookieFetcher { seen: Mutex::new(Vec::new()) }))
            .with_cookie_store(store.clone(), Duration::from_secs(600));

        service.response(&FetchRequest::base("http://example.com")).await.unwrap();
        assert!(store.expired(&RecordKey::cookies("")).await);
    }
}
