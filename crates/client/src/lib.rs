//! Fetch pipeline for trawl.
//!
//! This crate provides the fetcher backends, the robots.txt checker, the
//! [`FetchService`] dispatching requests to them, and the middleware chain
//! layered on top.

pub mod fetcher;
pub mod middleware;
pub mod robots;
pub mod service;

pub use fetcher::{BaseFetcher, FetchConfig, Fetcher, SplashConfig, SplashFetcher};
#[cfg(feature = "render")]
pub use fetcher::{ChromeConfig, ChromeFetcher};
pub use middleware::{Layer, ServiceBuilder};
pub use robots::{RobotsChecker, RobotsError, RobotsPolicy};
pub use service::{FetchService, Service};
