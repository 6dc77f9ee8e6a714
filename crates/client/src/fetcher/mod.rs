//! Fetcher backends.
//!
//! Three interchangeable ways to acquire a page:
//!
//! - [`BaseFetcher`]: one plain HTTP request carrying the request cookies
//! - [`SplashFetcher`]: a remote JavaScript rendering service
//! - [`ChromeFetcher`]: a headless browser over the DevTools protocol
//!   (feature `render`)
//!
//! Each backend computes cache metadata on the response it returns.

pub mod base;
pub mod charset;
pub mod cookies;
pub mod splash;

#[cfg(feature = "render")]
pub mod chrome;

use async_trait::async_trait;
use trawl_core::{Error, FetchRequest, FetchResponse, FetcherKind, HeaderSnapshot};

pub use base::{BaseFetcher, FetchConfig};
pub use splash::{SplashConfig, SplashFetcher};

#[cfg(feature = "render")]
pub use chrome::{ChromeConfig, ChromeFetcher};

/// A backend capable of retrieving one web resource.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn kind(&self) -> FetcherKind;

    /// One-time setup before the first fetch (connections, health checks).
    async fn prepare(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error>;

    /// Release resources held by the backend.
    async fn close(&self) {}
}

/// Copy a reqwest header map into a snapshot, skipping non-UTF-8 values.
pub fn snapshot_headers(headers: &reqwest::header::HeaderMap) -> HeaderSnapshot {
    headers
        .iter()
        .filter_map(|(name, value)| match value.to_str() {
            Ok(value) => Some((name.as_str(), value.to_string())),
            Err(_) => {
                tracing::debug!(header = %name, "skipping non-utf8 header value");
                None
            }
        })
        .collect()
}

/// Map a reqwest transport error to the unified error type.
pub(crate) fn transport_error(context: &str, err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("{context}: {err}"))
    } else {
        Error::Error(format!("{context}: network error: {err}"))
    }
}
