//! Plain HTTP fetcher.
//!
//! One request per fetch through a shared reqwest client. The client keeps
//! no cookies of its own: only the cookies carried by the request are sent,
//! so state never leaks between users. Form data turns the request into a form-encoded POST. The body is
//! normalized to UTF-8 and cache metadata is computed before returning.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode, header};
use trawl_core::{AppConfig, Error, FetchRequest, FetchResponse, FetcherKind};

use super::{Fetcher, charset, cookies, snapshot_headers, transport_error};

/// Configuration for the base fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,

    /// Maximum response body size in bytes.
    pub max_bytes: usize,

    pub timeout: Duration,

    /// Maximum number of redirects to follow.
    pub max_redirects: usize,

    /// Outbound proxy URL.
    pub proxy: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let app = AppConfig::default();
        Self::from(&app)
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(app: &AppConfig) -> Self {
        Self {
            user_agent: app.user_agent.clone(),
            max_bytes: app.max_bytes,
            timeout: app.timeout(),
            max_redirects: 10,
            proxy: app.proxy.clone(),
        }
    }
}

/// Stateless HTTP fetcher.
pub struct BaseFetcher {
    http: Client,
    config: FetchConfig,
}

impl BaseFetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true);

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| Error::Error(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let http = builder.build().map_err(|e| Error::Error(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn build(&self, request: &FetchRequest) -> Result<reqwest::Request, Error> {
        let url = request.parsed_url()?;
        let method = Method::from_bytes(request.method().to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::BadRequest(format!("invalid method: {}", request.method())))?;

        let mut builder = self
            .http
            .request(method, url)
            .header(header::ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8");

        if let Some(cookie) = cookies::cookie_header(request.cookies()) {
            builder = builder.header(header::COOKIE, cookie);
        }

        if let Some(form) = request.form_data() {
            let body = encode_form(form);
            builder = builder
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::CONTENT_LENGTH, body.len())
                .body(body);
        }

        builder.build().map_err(|e| Error::BadRequest(e.to_string()))
    }
}

#[async_trait]
impl Fetcher for BaseFetcher {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Base
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let start = Instant::now();
        let outbound = self.build(request)?;
        let method = outbound.method().to_string();
        let request_headers = snapshot_headers(outbound.headers());

        let response = self.http.execute(outbound).await.map_err(|e| transport_error(request.url(), &e))?;

        let status = response.status();
        match status {
            s if s.is_success() || s == StatusCode::NOT_FOUND => {}
            StatusCode::FORBIDDEN => return Err(Error::Forbidden(request.url().to_string())),
            s => return Err(Error::Error(format!("{}: status {}", request.url(), s))),
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::Error(format!("{len} bytes exceeds {}", self.config.max_bytes)));
        }

        let final_url = response.url().to_string();
        let response_headers = snapshot_headers(response.headers());
        let bytes = response.bytes().await.map_err(|e| transport_error(request.url(), &e))?;
        if bytes.len() > self.config.max_bytes {
            return Err(Error::Error(format!("{} bytes exceeds {}", bytes.len(), self.config.max_bytes)));
        }

        let now = Utc::now();
        let html = charset::decode(&bytes, response_headers.get("content-type"));
        let mut resp = FetchResponse::new(FetcherKind::Base, final_url, status.as_u16(), html);
        resp.method = method;
        resp.cookies = cookies::parse_all(response_headers.get_all("set-cookie"), now);
        resp.request_headers = request_headers;
        resp.response_headers = response_headers;
        resp.set_cache_info(now);

        tracing::debug!(
            url = request.url(),
            final_url = %resp.url,
            status = resp.status_code,
            bytes = bytes.len(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "base fetch complete"
        );

        Ok(resp)
    }
}

/// Re-encode `k=v&k2=v2` form data so every pair is properly escaped.
pub fn encode_form(raw: &str) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        serializer.append_pair(key, value);
    }
    serializer.finish()
}
