//! Decorators around a [`FetchService`].
//!
//! Each middleware owns the next service in the chain and implements
//! [`FetchService`] itself. The reference composition, outermost first:
//!
//! ```text
//! Robots -> Storage -> [Queue] -> Stats -> Logging -> Service
//! ```
//!
//! [`ServiceBuilder`] stacks [`Layer`]s in that order: the first layer
//! added ends up outermost.

pub mod logging;
pub mod queue;
pub mod robots;
pub mod stats;
pub mod storage;

use std::sync::Arc;

use crate::service::FetchService;

pub use logging::{LoggingLayer, LoggingMiddleware};
pub use queue::{Notifier, QueueLayer, QueueMiddleware, SqsNotifier};
pub use robots::{RobotsLayer, RobotsMiddleware};
pub use stats::{StatsLayer, StatsMiddleware};
pub use storage::{StorageLayer, StorageMiddleware};

/// Wraps a service in one middleware.
pub trait Layer: Send + Sync {
    fn layer(&self, inner: Arc<dyn FetchService>) -> Arc<dyn FetchService>;
}

/// Builds a middleware chain around an inner service.
#[derive(Default)]
pub struct ServiceBuilder {
    layers: Vec<Box<dyn Layer>>,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn service(self, inner: Arc<dyn FetchService>) -> Arc<dyn FetchService> {
        self.layers.iter().rev().fold(inner, |inner, layer| layer.layer(inner))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use trawl_core::{Error, FetchRequest, FetchResponse};

    use super::*;
    use crate::service::testing::StubService;

    /// Records its name on the way in.
    struct Tag {
        name: &'static str,
        trail: Arc<Mutex<Vec<&'static str>>>,
    }

    struct Tagged {
        name: &'static str,
        trail: Arc<Mutex<Vec<&'static str>>>,
        inner: Arc<dyn FetchService>,
    }

    impl Layer for Tag {
        fn layer(&self, inner: Arc<dyn FetchService>) -> Arc<dyn FetchService> {
            Arc::new(Tagged { name: self.name, trail: self.trail.clone(), inner })
        }
    }

    #[async_trait]
    impl FetchService for Tagged {
        async fn response(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
            self.trail.lock().unwrap().push(self.name);
            self.inner.response(request).await
        }
    }

    #[tokio::test]
    async fn test_first_layer_is_outermost() {
        let trail = Arc::new(Mutex::new(Vec::new()));
        let tag = |name| Tag { name, trail: trail.clone() };
        let service = ServiceBuilder::new()
            .layer(tag("robots"))
            .layer(tag("storage"))
            .layer(tag("logging"))
            .service(Arc::new(StubService::page(200, "<p></p>")));

        service.response(&FetchRequest::base("http://example.com")).await.unwrap();
        assert_eq!(*trail.lock().unwrap(), vec!["robots", "storage", "logging"]);
    }
}
