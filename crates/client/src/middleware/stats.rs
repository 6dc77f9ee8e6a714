//! Per-identity request counters.
//!
//! Only caller requests are counted. robots.txt fetches and the HEAD
//! lookups issued by the robots layer pass through uncounted.

use std::sync::Arc;

use async_trait::async_trait;
use trawl_core::{Error, FetchRequest, FetchResponse, RecordKey, Store};

use super::Layer;
use crate::service::FetchService;

/// Counter identity for requests without a user token.
pub const ANONYMOUS: &str = "anonymous";

/// Counts requests per identity in the active store.
pub struct StatsMiddleware {
    store: Arc<dyn Store>,
    inner: Arc<dyn FetchService>,
}

impl StatsMiddleware {
    pub fn new(store: Arc<dyn Store>, inner: Arc<dyn FetchService>) -> Self {
        Self { store, inner }
    }
}

#[async_trait]
impl FetchService for StatsMiddleware {
    async fn response(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        if request.is_robots_txt() || request.method().eq_ignore_ascii_case("HEAD") {
            return self.inner.response(request).await;
        }
        let identity = request.user_token().unwrap_or(ANONYMOUS);
        match self.store.increment(&RecordKey::stats(identity)).await {
            Ok(count) => tracing::trace!(identity, count, "request counted"),
            Err(e) => tracing::warn!(identity, error = %e, "failed to update request counter"),
        }
        self.inner.response(request).await
    }
}

pub struct StatsLayer {
    store: Arc<dyn Store>,
}

impl StatsLayer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl Layer for StatsLayer {
    fn layer(&self, inner: Arc<dyn FetchService>) -> Arc<dyn FetchService> {
        Arc::new(StatsMiddleware::new(self.store.clone(), inner))
    }
}
