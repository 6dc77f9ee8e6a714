//! Publishes fetched pages to a message queue for downstream consumers.
//!
//! Only page GETs are published; robots.txt bodies, HEAD lookups and form
//! posts never reach the queue.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageAttributeValue;
use chrono::Utc;
use trawl_core::config::QueueConfig;
use trawl_core::{Error, FetchRequest, FetchResponse};

use super::Layer;
use crate::service::FetchService;

/// Destination for fetched pages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, url: &str, html: &str) -> Result<(), Error>;
}

/// Sends each page as an SQS message body with a `URL` attribute.
pub struct SqsNotifier {
    client: Client,
    queue_url: String,
}

impl SqsNotifier {
    pub async fn connect(config: &QueueConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;
        Self::with_client(Client::new(&shared), &config.url)
    }

    pub fn with_client(client: Client, queue_url: impl Into<String>) -> Self {
        Self { client, queue_url: queue_url.into() }
    }
}

#[async_trait]
impl Notifier for SqsNotifier {
    async fn publish(&self, url: &str, html: &str) -> Result<(), Error> {
        let attribute = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(url)
            .build()
            .map_err(|e| Error::Error(format!("sqs: {e}")))?;
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(html)
            .message_attributes("URL", attribute)
            .send()
            .await
            .map_err(|e| Error::Error(format!("sqs: {}", DisplayErrorContext(&e))))?;
        Ok(())
    }
}

/// Forwards fresh cacheable pages to a [`Notifier`]. Publish failures are
/// logged and never fail the fetch.
pub struct QueueMiddleware {
    notifier: Arc<dyn Notifier>,
    inner: Arc<dyn FetchService>,
}

impl QueueMiddleware {
    pub fn new(notifier: Arc<dyn Notifier>, inner: Arc<dyn FetchService>) -> Self {
        Self { notifier, inner }
    }
}

#[async_trait]
impl FetchService for QueueMiddleware {
    async fn response(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let resp = self.inner.response(request).await?;
        if !request.is_plain_get() || request.is_robots_txt() {
            return Ok(resp);
        }
        if resp.is_cacheable() && resp.is_fresh(Utc::now()) && !resp.is_not_found() {
            tracing::debug!(url = request.url(), size_kb = resp.html.len() as f64 / 1024.0, "publishing page");
            if let Err(e) = self.notifier.publish(request.url(), &resp.html).await {
                tracing::warn!(url = request.url(), error = %e, "failed to publish page");
            }
        }
        Ok(resp)
    }
}

pub struct QueueLayer {
    notifier: Arc<dyn Notifier>,
}

impl QueueLayer {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl Layer for QueueLayer {
    fn layer(&self, inner: Arc<dyn FetchService>) -> Arc<dyn FetchService> {
        Arc::new(QueueMiddleware::new(self.notifier.clone(), inner))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::service::testing::StubService;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn publish(&self, url: &str, html: &str) -> Result<(), Error> {
            if self.fail {
                return Err(Error::Error("queue unavailable".into()));
            }
            self.sent.lock().unwrap().push((url.to_string(), html.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publishes_fresh_pages() {
        let recorder = Arc::new(Recorder::default());
        let service = QueueLayer::new(recorder.clone()).layer(Arc::new(StubService::page(200, "<p>hi</p>")));

        service.response(&FetchRequest::base("http://example.com/a")).await.unwrap();
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(*sent, vec![("http://example.com/a".to_string(), "<p>hi</p>".to_string())]);
    }

    #[tokio::test]
    async fn test_skips_uncacheable_pages() {
        let recorder = Arc::new(Recorder::default());
        let stub = StubService::new(|request| {
            let mut resp = FetchResponse::new(request.kind(), request.url(), 200, "<p>private</p>");
            resp.response_headers.append("cache-control", "no-store");
            resp.set_cache_info(Utc::now());
            Ok(resp)
        });
        let service = QueueLayer::new(recorder.clone()).layer(Arc::new(stub));

        service.response(&FetchRequest::base("http://example.com/a")).await.unwrap();
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skips_robots_and_head_lookups() {
        let recorder = Arc::new(Recorder::default());
        let service = QueueLayer::new(recorder.clone()).layer(Arc::new(StubService::page(200, "<p>hi</p>")));

        service.response(&FetchRequest::base("http://example.com/robots.txt")).await.unwrap();
        service.response(&FetchRequest::base("http://example.com/a").with_method("HEAD")).await.unwrap();
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_fetch() {
        let recorder = Arc::new(Recorder { fail: true, ..Default::default() });
        let service = QueueLayer::new(recorder).layer(Arc::new(StubService::page(200, "<p>hi</p>")));
        assert!(service.response(&FetchRequest::base("http://example.com/a")).await.is_ok());
    }
}
