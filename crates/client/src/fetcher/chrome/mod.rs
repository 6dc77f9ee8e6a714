//! Headless browser fetcher over the DevTools protocol.
//!
//! Each fetch opens a fresh tab, seeds request cookies, and navigates while
//! a background task services paused requests: the document request is
//! rewritten to a POST when the request carries form data, and images,
//! stylesheets and configured resources are aborted. Navigation completes
//! on `DOMContentLoaded` within the configured timeout. Post-load actions
//! run before the HTML and cookies are captured.

pub mod actions;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams, HeaderEntry, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, CookieParam, ErrorReason, EventResponseReceived, Headers, ResourceType, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EnableParams as PageEnableParams, EventDomContentEventFired, NavigateParams,
};
use chromiumoxide::error::CdpError;
use chrono::{DateTime, Utc};
use futures_util::{FutureExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use trawl_core::{Cookie, Error, FetchRequest, FetchResponse, FetcherKind, HeaderSnapshot};
use url::Url;

pub use trawl_core::config::ChromeConfig;

use super::Fetcher;
use super::base::encode_form;

/// Errors raised while driving the browser.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Failed to launch or connect to browser.
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("devtools protocol error: {0}")]
    Protocol(String),

    /// Navigation was rejected by the browser.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// DOMContentLoaded did not fire in time.
    #[error("render timeout after {0}ms")]
    Timeout(u64),

    /// A post-load action threw or could not run.
    #[error("page action failed: {0}")]
    Action(String),

    #[error("request interception failed: {0}")]
    Interception(String),

    /// Browser closed unexpectedly.
    #[error("browser closed unexpectedly")]
    BrowserClosed,
}

impl From<CdpError> for RenderError {
    fn from(err: CdpError) -> Self {
        RenderError::Protocol(err.to_string())
    }
}

impl From<RenderError> for Error {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Timeout(_) => Error::Timeout(err.to_string()),
            other => Error::Error(other.to_string()),
        }
    }
}

/// Await `fut`, failing with [`RenderError::Timeout`] once `limit` elapses.
pub async fn within<T>(limit: Duration, fut: impl Future<Output = Result<T, RenderError>>) -> Result<T, RenderError> {
    tokio::time::timeout(limit, fut).await.map_err(|_| RenderError::Timeout(limit.as_millis() as u64))?
}

/// Fail with [`RenderError::Navigation`] when the browser reported an error
/// for the navigation.
fn navigation_result(error_text: Option<&str>) -> Result<(), RenderError> {
    match error_text.filter(|e| !e.is_empty()) {
        Some(reason) => Err(RenderError::Navigation(reason.to_string())),
        None => Ok(()),
    }
}

/// Stop the interceptor and wait for it. A navigation error wins over an
/// interception error.
async fn settle(
    navigation: Result<(), RenderError>, stop: oneshot::Sender<()>, interceptor: JoinHandle<Result<(), RenderError>>,
) -> Result<(), RenderError> {
    let _ = stop.send(());
    let intercepted = interceptor.await.map_err(|e| RenderError::Interception(e.to_string()));
    navigation?;
    intercepted?
}

/// Feed `events` to `handle` until `stopped` fires or the stream ends. The
/// first handler error ends the loop.
async fn serve_until<S, F, Fut>(
    mut events: S, mut stopped: oneshot::Receiver<()>, mut handle: F,
) -> Result<(), RenderError>
where
    S: Stream + Unpin,
    F: FnMut(S::Item) -> Fut,
    Fut: Future<Output = Result<(), RenderError>>,
{
    loop {
        let event = tokio::select! {
            _ = &mut stopped => return Ok(()),
            event = events.next() => match event {
                Some(event) => event,
                None => return Ok(()),
            },
        };
        handle(event).await?;
    }
}

/// What to do with one paused request.
enum Verdict {
    Post(ContinueRequestParams),
    Abort,
    Continue,
}

/// Form body to substitute into the intercepted document request.
struct PostBody {
    target: Url,
    body: String,
}

pub struct ChromeFetcher {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
    config: ChromeConfig,
}

impl ChromeFetcher {
    /// Connect to `config.ws_url` when set, otherwise launch a local browser.
    pub async fn launch(config: ChromeConfig) -> Result<Self, RenderError> {
        let (browser, mut handler) = match config.ws_url.as_deref().filter(|u| !u.is_empty()) {
            Some(ws_url) => Browser::connect(ws_url).await.map_err(|e| RenderError::Launch(e.to_string()))?,
            None => {
                let mut builder = BrowserConfig::builder();
                if let Some(executable) = &config.executable {
                    builder = builder.chrome_executable(executable);
                }
                let browser_config = builder.build().map_err(RenderError::Launch)?;
                Browser::launch(browser_config).await.map_err(|e| RenderError::Launch(e.to_string()))?
            }
        };

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {e}");
                    break;
                }
            }
        });

        Ok(Self { browser: Mutex::new(browser), handler, config })
    }

    async fn render(&self, page: &Page, request: &FetchRequest) -> Result<FetchResponse, RenderError> {
        let target = request.parsed_url().map_err(|e| RenderError::Navigation(e.to_string()))?;
        page.execute(PageEnableParams::default()).await?;

        if !request.cookies().is_empty() {
            page.set_cookies(cookie_params(&target, request.cookies())?).await?;
        }

        let mut dom_loaded = page.event_listener::<EventDomContentEventFired>().await?;
        let mut responses = page.event_listener::<EventResponseReceived>().await?;

        let post = request.form_data().map(|form| PostBody { target: target.clone(), body: encode_form(form) });
        let (stop, interceptor) = self.intercept(page, post).await?;

        let timeout = self.config.navigation_timeout();
        let navigation = within(timeout, async {
            let nav = page.execute(NavigateParams::new(target.as_str())).await?;
            navigation_result(nav.result.error_text.as_deref())?;
            dom_loaded.next().await.ok_or(RenderError::BrowserClosed)?;
            Ok::<(), RenderError>(())
        })
        .await;

        settle(navigation, stop, interceptor).await?;
        page.execute(fetch::DisableParams::default()).await?;

        if let FetchRequest::Browser(browser_request) = request {
            actions::run(page, &browser_request.actions).await?;
        }

        let html = page.content().await?;
        let final_url = page.url().await?.unwrap_or_else(|| target.to_string());
        let cookies = page.get_cookies().await?.into_iter().map(from_browser_cookie).collect();

        let mut document = None;
        while let Some(Some(event)) = responses.next().now_or_never() {
            if event.r#type == ResourceType::Document {
                document = Some(event);
                break;
            }
        }

        let status = document.as_ref().map(|e| e.response.status as u16).unwrap_or(200);
        let mut resp = FetchResponse::new(FetcherKind::Chrome, final_url, status, html);
        resp.method = request.method().to_string();
        if let Some(event) = &document {
            if !event.response.status_text.is_empty() {
                resp.status = event.response.status_text.clone();
            }
            resp.response_headers = snapshot(&event.response.headers);
            resp.request_headers = event.response.request_headers.as_ref().map(snapshot).unwrap_or_default();
        }
        resp.cookies = cookies;
        resp.set_cache_info(Utc::now());
        Ok(resp)
    }

    /// Enable the Fetch domain and spawn the task answering paused
    /// requests. The task runs until `stop` fires or the stream ends.
    async fn intercept(
        &self, page: &Page, post: Option<PostBody>,
    ) -> Result<(oneshot::Sender<()>, JoinHandle<Result<(), RenderError>>), RenderError> {
        let paused = page.event_listener::<EventRequestPaused>().await?;
        let pattern = RequestPattern::builder().url_pattern("*").request_stage(RequestStage::Request).build();
        page.execute(fetch::EnableParams::builder().patterns(vec![pattern]).build()).await?;

        let (stop, stopped) = oneshot::channel::<()>();
        let page = page.clone();
        let excluded = self.config.excluded_resources.clone();
        let mut post = post;

        let handle = move |event: Arc<EventRequestPaused>| {
            let decision = verdict(&event, &mut post, &excluded);
            let page = page.clone();
            async move {
                let outcome = match decision? {
                    Verdict::Post(params) => {
                        page.execute(params).await.map_err(|e| RenderError::Interception(e.to_string()))?;
                        return Ok(());
                    }
                    Verdict::Abort => page
                        .execute(FailRequestParams::new(event.request_id.clone(), ErrorReason::Aborted))
                        .await
                        .map(|_| ()),
                    Verdict::Continue => {
                        page.execute(ContinueRequestParams::new(event.request_id.clone())).await.map(|_| ())
                    }
                };
                if let Err(e) = outcome {
                    tracing::debug!(url = %event.request.url, error = %e, "paused request already resolved");
                }
                Ok(())
            }
        };
        let task = tokio::spawn(serve_until(paused, stopped, handle));
        Ok((stop, task))
    }
}

/// The form target becomes a POST once; images, stylesheets and excluded
/// resources are aborted; everything else continues.
fn verdict(
    event: &EventRequestPaused, post: &mut Option<PostBody>, excluded: &[String],
) -> Result<Verdict, RenderError> {
    let is_target = post
        .as_ref()
        .is_some_and(|p| event.resource_type == ResourceType::Document && same_document(&event.request.url, &p.target));
    if is_target && let Some(form) = post.take() {
        return Ok(Verdict::Post(post_params(event, &form.body)?));
    }
    let is_excluded = excluded.iter().any(|res| !res.is_empty() && event.request.url.contains(res.as_str()));
    if matches!(event.resource_type, ResourceType::Image | ResourceType::Stylesheet) || is_excluded {
        return Ok(Verdict::Abort);
    }
    Ok(Verdict::Continue)
}

/// Rewrite the paused document request into a form POST.
fn post_params(event: &EventRequestPaused, body: &str) -> Result<ContinueRequestParams, RenderError> {
    let mut headers: Vec<HeaderEntry> = header_pairs(&event.request.headers)
        .into_iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("content-type") && !name.eq_ignore_ascii_case("content-length"))
        .map(|(name, value)| HeaderEntry::new(name, value))
        .collect();
    headers.push(HeaderEntry::new("Content-Type", "application/x-www-form-urlencoded"));
    headers.push(HeaderEntry::new("Content-Length", body.len().to_string()));

    ContinueRequestParams::builder()
        .request_id(event.request_id.clone())
        .method("POST")
        .post_data(STANDARD.encode(body))
        .headers(headers)
        .build()
        .map_err(RenderError::Interception)
}

fn same_document(url: &str, target: &Url) -> bool {
    let strip = |u: &str| u.split('#').next().unwrap_or(u).trim_end_matches('/').to_string();
    strip(url) == strip(target.as_str())
}

/// Header pairs from a protocol header object. Repeated headers arrive
/// joined by newlines.
fn header_pairs(headers: &Headers) -> Vec<(String, String)> {
    let Some(map) = headers.inner().as_object() else {
        return Vec::new();
    };
    map.iter()
        .flat_map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            value.split('\n').map(|v| (name.clone(), v.to_string())).collect::<Vec<_>>()
        })
        .collect()
}

fn snapshot(headers: &Headers) -> HeaderSnapshot {
    header_pairs(headers).into_iter().collect()
}

fn cookie_params(target: &Url, cookies: &[Cookie]) -> Result<Vec<CookieParam>, RenderError> {
    cookies
        .iter()
        .map(|c| {
            let mut builder = CookieParam::builder()
                .name(c.name.clone())
                .value(c.value.clone())
                .url(target.as_str())
                .secure(c.secure)
                .http_only(c.http_only);
            if let Some(domain) = &c.domain {
                builder = builder.domain(domain.clone());
            }
            if let Some(path) = &c.path {
                builder = builder.path(path.clone());
            }
            if let Some(expires) = c.expires.as_deref().and_then(|e| DateTime::parse_from_rfc3339(e).ok()) {
                builder = builder.expires(TimeSinceEpoch::new(expires.timestamp() as f64));
            }
            builder.build().map_err(RenderError::Protocol)
        })
        .collect()
}

fn from_browser_cookie(cookie: network::Cookie) -> Cookie {
    let expires = (cookie.expires > 0.0)
        .then(|| DateTime::<Utc>::from_timestamp(cookie.expires as i64, 0))
        .flatten()
        .map(|at| at.to_rfc3339());
    Cookie {
        name: cookie.name,
        value: cookie.value,
        domain: Some(cookie.domain.trim_start_matches('.').to_string()),
        path: Some(cookie.path),
        expires,
        http_only: cookie.http_only,
        secure: cookie.secure,
    }
}

#[async_trait]
impl Fetcher for ChromeFetcher {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Chrome
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let start = Instant::now();
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page("about:blank").await.map_err(RenderError::from)?
        };

        let result = self.render(&page, request).await;
        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "failed to close tab");
        }
        let resp = result?;

        tracing::debug!(
            url = request.url(),
            final_url = %resp.url,
            status = resp.status_code,
            fetch_ms = start.elapsed().as_millis() as u64,
            "browser fetch complete"
        );
        Ok(resp)
    }

    async fn close(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            tracing::debug!(error = %e, "browser close failed");
        }
        self.handler.abort();
    }
}
