//! Assembles the fetch pipeline from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use trawl_client::fetcher::{BaseFetcher, FetchConfig, Fetcher, SplashFetcher};
use trawl_client::middleware::{
    LoggingLayer, QueueLayer, RobotsLayer, ServiceBuilder, SqsNotifier, StatsLayer, StorageLayer,
};
use trawl_client::{FetchService, Service};
use trawl_core::{AppConfig, Store, open_store};

/// The assembled chain plus the handles needed to shut it down.
pub struct Pipeline {
    pub service: Arc<dyn FetchService>,
    fetchers: Arc<Service>,
    store: Option<Arc<dyn Store>>,
}

impl Pipeline {
    /// Robots -> Storage -> [Queue] -> Stats -> Logging -> Service.
    pub async fn build(config: &AppConfig) -> Result<Self> {
        let store = if config.storage.enabled {
            Some(open_store(&config.storage).await.context("failed to open storage")?)
        } else {
            tracing::info!("storage disabled, every request is fetched");
            None
        };

        let base = BaseFetcher::new(FetchConfig::from(config)).context("failed to build base fetcher")?;
        let splash = SplashFetcher::new(config.splash.clone(), &config.user_agent)
            .context("failed to build splash fetcher")?;
        if let Err(e) = splash.prepare().await {
            tracing::warn!(host = %config.splash.host, error = %e, "splash is not reachable yet");
        }

        let mut service = Service::new(Arc::new(base)).with_splash(Arc::new(splash));
        service = with_chrome(service, config).await?;
        if let Some(store) = &store {
            service = service.with_cookie_store(store.clone(), config.storage.expire());
        }
        let fetchers = Arc::new(service);

        let mut builder = ServiceBuilder::new();
        if config.robots.enabled {
            builder = builder.layer(RobotsLayer::new(&config.robots.agent));
        }
        if let Some(store) = &store {
            builder = builder.layer(StorageLayer::new(store.clone()));
        }
        if let Some(queue) = &config.queue {
            builder = builder.layer(QueueLayer::new(Arc::new(SqsNotifier::connect(queue).await)));
        }
        if config.stats_enabled
            && let Some(store) = &store
        {
            builder = builder.layer(StatsLayer::new(store.clone()));
        }
        let service = builder.layer(LoggingLayer).service(fetchers.clone());

        Ok(Self { service, fetchers, store })
    }

    /// Release fetchers and storage connections.
    pub async fn close(&self) {
        self.fetchers.close().await;
        if let Some(store) = &self.store
            && let Err(e) = store.close().await
        {
            tracing::warn!(error = %e, "failed to close storage");
        }
    }
}

#[cfg(feature = "render")]
async fn with_chrome(service: Service, config: &AppConfig) -> Result<Service> {
    use trawl_client::ChromeFetcher;

    if !config.chrome.enabled {
        return Ok(service);
    }
    let chrome = ChromeFetcher::launch(config.chrome.clone()).await.context("failed to start browser")?;
    tracing::info!("headless browser ready");
    Ok(service.with_chrome(Arc::new(chrome)))
}

#[cfg(not(feature = "render"))]
async fn with_chrome(service: Service, config: &AppConfig) -> Result<Service> {
    if config.chrome.enabled {
        tracing::warn!("chrome requested but built without the render feature");
    }
    Ok(service)
}
