//! Rendering-proxy fetcher.
//!
//! Pages are rendered by a remote service through its `execute` endpoint
//! with a Lua script. The script reports the last history entry, from which
//! the request and response header snapshots are built for cache
//! evaluation. robots.txt files go through a dedicated script that returns
//! the raw body base64-encoded.

pub mod reply;
pub mod script;

use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use trawl_core::{Error, FetchRequest, FetchResponse, FetcherKind};

pub use reply::{PingResponse, Reply};
pub use trawl_core::config::SplashConfig;

use super::{Fetcher, transport_error};
use reply::ServiceError;

/// Client for the rendering service.
pub struct SplashFetcher {
    http: Client,
    config: SplashConfig,
    user_agent: String,
}

impl SplashFetcher {
    pub fn new(config: SplashConfig, user_agent: impl Into<String>) -> Result<Self, Error> {
        let http = Client::builder()
            .timeout(config.client_timeout())
            .build()
            .map_err(|e| Error::Error(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config, user_agent: user_agent.into() })
    }

    fn endpoint(&self, path: &str) -> String {
        let host = self.config.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}/{path}")
        } else {
            format!("http://{host}/{path}")
        }
    }

    /// Service health and memory usage.
    pub async fn ping(&self) -> Result<PingResponse, Error> {
        let resp = self.http.get(self.endpoint("_ping")).send().await.map_err(|e| transport_error("ping", &e))?;
        if !resp.status().is_success() {
            return Err(Error::Error(format!("ping: status {}", resp.status())));
        }
        resp.json().await.map_err(|e| Error::Error(format!("ping: {e}")))
    }

    /// Ask the service to drop cached arguments and collect garbage.
    pub async fn collect_garbage(&self) -> Result<(), Error> {
        let resp = self.http.post(self.endpoint("_gc")).send().await.map_err(|e| transport_error("gc", &e))?;
        if !resp.status().is_success() {
            return Err(Error::Error(format!("gc: status {}", resp.status())));
        }
        Ok(())
    }

    async fn execute(&self, request: &FetchRequest) -> Result<Reply, Error> {
        let args = script::execute_args(request, &self.config, &self.user_agent)?;
        let resp = self
            .http
            .get(self.endpoint("execute"))
            .query(&args)
            .send()
            .await
            .map_err(|e| transport_error(request.url(), &e))?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| transport_error(request.url(), &e))?;
        match status {
            StatusCode::OK => Ok(serde_json::from_slice(&body)?),
            StatusCode::GATEWAY_TIMEOUT => Err(Error::GatewayTimeout(request.url().to_string())),
            s => {
                let detail = serde_json::from_slice::<ServiceError>(&body)
                    .map(|e| e.message())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
                Err(Error::Error(format!("{}: render service returned {s}: {detail}", request.url())))
            }
        }
    }
}

/// Build the unified response from a successful reply.
fn build_response(request: &FetchRequest, reply: Reply) -> Result<FetchResponse, Error> {
    let Some(info) = reply.response.as_ref() else {
        return Err(Error::Error(format!("{}: empty response from render service", request.url())));
    };

    let html = if request.is_robots_txt() {
        let text = info.content.as_ref().map(|c| c.text.as_str()).unwrap_or_default();
        let bytes =
            STANDARD.decode(text.trim()).map_err(|e| Error::Error(format!("{}: robots body: {e}", request.url())))?;
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        reply.html.clone()
    };

    let url = reply.url.clone().filter(|u| !u.is_empty()).unwrap_or_else(|| {
        if info.url.is_empty() { request.url().to_string() } else { info.url.clone() }
    });
    let status = if info.status == 0 { 200 } else { info.status };

    let mut resp = FetchResponse::new(FetcherKind::Splash, url, status, html);
    if !info.status_text.is_empty() {
        resp.status = info.status_text.clone();
    }
    resp.method = reply
        .request
        .as_ref()
        .map(|r| r.method.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| request.method().to_string());
    resp.request_headers = reply.request_headers();
    resp.response_headers = reply.response_headers();
    resp.cookies = reply.cookies;
    resp.set_cache_info(Utc::now());
    Ok(resp)
}

#[async_trait]
impl Fetcher for SplashFetcher {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Splash
    }

    async fn prepare(&self) -> Result<(), Error> {
        let ping = self.ping().await?;
        tracing::info!(host = %self.config.host, status = %ping.status, maxrss = ping.maxrss, "render service reachable");
        Ok(())
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let start = Instant::now();
        let mut reply = self.execute(request).await?;
        if reply.is_detached() {
            tracing::warn!(url = request.url(), "render service returned no history, collecting garbage and retrying");
            self.collect_garbage().await?;
            reply = self.execute(request).await?;
            if reply.is_detached() {
                return Err(Error::Error(format!("{}: render service returned no history", request.url())));
            }
        }

        reply.check(request.url())?;
        let resp = build_response(request, reply)?;

        tracing::debug!(
            url = request.url(),
            status = resp.status_code,
            cacheable = resp.is_cacheable(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "render fetch complete"
        );
        Ok(resp)
    }
}
