//! robots.txt enforcement at the front of the chain.
//!
//! The policy and redirect lookups go through the wrapped service, so they
//! reach the storage layer below. robots.txt responses are cached like any
//! page; the HEAD lookup is not.

use std::sync::Arc;

use async_trait::async_trait;
use trawl_core::{Error, FetchRequest, FetchResponse};

use super::Layer;
use crate::robots::RobotsChecker;
use crate::service::FetchService;

/// Refuses requests disallowed by the target host's robots.txt.
pub struct RobotsMiddleware {
    checker: RobotsChecker,
    inner: Arc<dyn FetchService>,
}

impl RobotsMiddleware {
    pub fn new(checker: RobotsChecker, inner: Arc<dyn FetchService>) -> Self {
        Self { checker, inner }
    }
}

#[async_trait]
impl FetchService for RobotsMiddleware {
    async fn response(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        self.checker.check(self.inner.as_ref(), request).await?;
        self.inner.response(request).await
    }
}

pub struct RobotsLayer {
    checker: RobotsChecker,
}

impl RobotsLayer {
    pub fn new(agent: impl Into<String>) -> Self {
        Self { checker: RobotsChecker::new(agent) }
    }
}

impl Layer for RobotsLayer {
    fn layer(&self, inner: Arc<dyn FetchService>) -> Arc<dyn FetchService> {
        Arc::new(RobotsMiddleware::new(self.checker.clone(), inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::StubService;
    use trawl_core::FetcherKind;

    fn site(robots: &'static str) -> Arc<StubService> {
        Arc::new(StubService::new(move |request| {
            let body = if request.is_robots_txt() { robots } else { "<html>page</html>" };
            Ok(FetchResponse::new(FetcherKind::Base, request.url(), 200, body))
        }))
    }

    #[tokio::test]
    async fn test_disallowed_page_is_never_fetched() {
        let stub = site("User-agent: *\nDisallow: /secret\n");
        let service = RobotsLayer::new("DataflowKitBot").layer(stub.clone());

        let result = service.fetch(&FetchRequest::rendered("http://example.com/secret/a")).await;
        assert!(matches!(result, Err(Error::ForbiddenByRobots(_))));
        let seen = stub.seen.lock().unwrap();
        assert!(seen.iter().all(|r| r.is_robots_txt() || r.method() == "HEAD"));
    }

    #[tokio::test]
    async fn test_allowed_page_passes_through() {
        let stub = site("User-agent: *\nDisallow: /secret\n");
        let service = RobotsLayer::new("DataflowKitBot").layer(stub.clone());

        let html = service.fetch(&FetchRequest::base("http://example.com/open")).await.unwrap();
        assert_eq!(html, "<html>page</html>");
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_redirect_lookup_does_not_replace_cached_page() {
        use std::time::Duration;

        use chrono::Utc;
        use trawl_core::storage::DiskStore;

        use crate::middleware::{ServiceBuilder, StorageLayer};

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path(), Duration::from_secs(3600), 16).await.unwrap());
        let stub = Arc::new(StubService::new(|request| {
            let (url, body) = match request.url() {
                "http://old.example/robots.txt" => (request.url(), "User-agent: *\nDisallow: /\n"),
                "http://new.example/robots.txt" => (request.url(), "User-agent: *\nAllow: /\n"),
                _ if request.method() == "HEAD" => ("http://new.example/page", ""),
                _ => ("http://new.example/page", "<html>real</html>"),
            };
            let mut resp = FetchResponse::new(FetcherKind::Base, url, 200, body);
            resp.method = request.method().to_string();
            resp.response_headers.append("cache-control", "max-age=3600");
            resp.set_cache_info(Utc::now());
            Ok(resp)
        }));
        let service = ServiceBuilder::new()
            .layer(RobotsLayer::new("DataflowKitBot"))
            .layer(StorageLayer::new(store))
            .service(stub.clone());

        let request = FetchRequest::base("http://old.example/page");
        assert_eq!(service.fetch(&request).await.unwrap(), "<html>real</html>");
        assert_eq!(service.fetch(&request).await.unwrap(), "<html>real</html>");
        let gets = stub.seen.lock().unwrap().iter().filter(|r| r.url() == request.url() && r.method() == "GET").count();
        assert_eq!(gets, 1);
    }

    #[tokio::test]
    async fn test_robots_request_is_not_checked_against_itself() {
        let stub = site("User-agent: *\nDisallow: /\n");
        let service = RobotsLayer::new("DataflowKitBot").layer(stub.clone());

        service.fetch(&FetchRequest::base("http://example.com/robots.txt")).await.unwrap();
        assert_eq!(stub.calls(), 1);
    }
}
