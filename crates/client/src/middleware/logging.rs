//! Structured request logging, innermost of the middlewares.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use trawl_core::{Error, FetchRequest, FetchResponse};

use super::Layer;
use crate::service::FetchService;

/// Emits one structured event per request.
pub struct LoggingMiddleware {
    inner: Arc<dyn FetchService>,
}

impl LoggingMiddleware {
    pub fn new(inner: Arc<dyn FetchService>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FetchService for LoggingMiddleware {
    async fn response(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let started = Instant::now();
        let result = self.inner.response(request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(resp) => tracing::info!(
                method = request.method(),
                url = request.url(),
                fetcher = %request.kind(),
                status = resp.status_code,
                duration_ms,
                "fetched"
            ),
            Err(e) => tracing::info!(
                method = request.method(),
                url = request.url(),
                fetcher = %request.kind(),
                duration_ms,
                error = %e,
                "fetch failed"
            ),
        }
        result
    }
}

pub struct LoggingLayer;

impl Layer for LoggingLayer {
    fn layer(&self, inner: Arc<dyn FetchService>) -> Arc<dyn FetchService> {
        Arc::new(LoggingMiddleware::new(inner))
    }
}
