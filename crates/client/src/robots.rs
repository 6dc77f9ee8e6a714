//! robots.txt policy.
//!
//! robots.txt is fetched through the wrapped service as a plain GET, so a
//! storage layer below caches it like any page. The HEAD request used to
//! follow redirects is never cached, so it cannot shadow the page. A 4xx answer
//! means there is no policy and everything is allowed; any other failure
//! is fatal for the request being checked.

use std::time::Duration;

use texting_robots::Robot;
use trawl_core::{Error, FetchRequest};
use url::Url;

use crate::service::FetchService;

/// Error type for robots.txt operations.
#[derive(Debug, thiserror::Error)]
pub enum RobotsError {
    #[error("{0}: forbidden by robots.txt")]
    Disallowed(String),

    #[error("failed to fetch robots.txt: {0}")]
    Fetch(String),

    #[error("failed to parse robots.txt: {0}")]
    Parse(String),
}

impl From<RobotsError> for Error {
    fn from(err: RobotsError) -> Self {
        match err {
            RobotsError::Disallowed(url) => Error::ForbiddenByRobots(url),
            other => Error::Error(other.to_string()),
        }
    }
}

/// Parsed rules for one host, as seen by one agent.
pub struct RobotsPolicy {
    host: String,
    robot: Robot,
}

impl RobotsPolicy {
    pub fn parse(agent: &str, host: impl Into<String>, body: &[u8]) -> Result<Self, RobotsError> {
        let robot = Robot::new(agent, body).map_err(|e| RobotsError::Parse(e.to_string()))?;
        Ok(Self { host: host.into(), robot })
    }

    /// Policy of a host without robots.txt.
    pub fn allow_all(agent: &str, host: impl Into<String>) -> Result<Self, RobotsError> {
        Self::parse(agent, host, b"")
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn allowed(&self, url: &str) -> bool {
        self.robot.allowed(url)
    }

    /// `Crawl-delay` of the matching group. Reported, not enforced.
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.robot.delay.filter(|d| d.is_finite() && *d > 0.0).map(Duration::from_secs_f32)
    }

    pub fn sitemaps(&self) -> &[String] {
        &self.robot.sitemaps
    }
}

/// `scheme://host[:port]/robots.txt` for `url`.
pub fn robots_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{host}:{port}/robots.txt", url.scheme()),
        None => format!("{}://{host}/robots.txt", url.scheme()),
    }
}

fn host_of(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
        None => url.host_str().unwrap_or_default().to_string(),
    }
}

/// Evaluates robots.txt for one agent.
#[derive(Debug, Clone)]
pub struct RobotsChecker {
    agent: String,
}

impl RobotsChecker {
    pub fn new(agent: impl Into<String>) -> Self {
        Self { agent: agent.into() }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Fetch and parse robots.txt for the host of `url` through `inner`.
    pub async fn policy(&self, inner: &dyn FetchService, url: &Url) -> Result<RobotsPolicy, RobotsError> {
        let robots = robots_url(url);
        let host = host_of(url);
        match inner.response(&FetchRequest::base(&robots)).await {
            Ok(resp) if (200..300).contains(&resp.status_code) => {
                let policy = RobotsPolicy::parse(&self.agent, host, resp.html.as_bytes())?;
                if let Some(delay) = policy.crawl_delay() {
                    tracing::debug!(robots_url = %robots, delay_ms = delay.as_millis() as u64, "crawl-delay declared");
                }
                Ok(policy)
            }
            Ok(resp) if (400..500).contains(&resp.status_code) => {
                tracing::debug!(robots_url = %robots, status = resp.status_code, "no robots.txt, allowing all");
                RobotsPolicy::allow_all(&self.agent, host)
            }
            Ok(resp) => Err(RobotsError::Fetch(format!("{robots}: status {}", resp.status_code))),
            Err(Error::NotFound(_) | Error::Forbidden(_)) => {
                tracing::debug!(robots_url = %robots, "no robots.txt, allowing all");
                RobotsPolicy::allow_all(&self.agent, host)
            }
            Err(e) => Err(RobotsError::Fetch(format!("{robots}: {e}"))),
        }
    }

    /// Fail with [`Error::ForbiddenByRobots`] unless `request` may be fetched.
    ///
    /// A disallowed URL may still redirect to another host; a HEAD
    /// request resolves the final URL, which is checked against its own
    /// host's policy.
    pub async fn check(&self, inner: &dyn FetchService, request: &FetchRequest) -> Result<(), Error> {
        if request.is_robots_txt() {
            return Ok(());
        }
        let url = request.parsed_url()?;
        let policy = self.policy(inner, &url).await?;
        if policy.allowed(url.as_str()) {
            return Ok(());
        }

        let lookup = FetchRequest::base(url.as_str()).with_method("HEAD");
        let final_url = match inner.response(&lookup).await {
            Ok(resp) => Url::parse(&resp.url).ok(),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "redirect lookup failed");
                None
            }
        };

        if let Some(final_url) = final_url
            && host_of(&final_url) != policy.host()
        {
            tracing::debug!(from = %url, to = %final_url, "disallowed URL redirects to another host");
            let redirected = self.policy(inner, &final_url).await?;
            if redirected.allowed(final_url.as_str()) {
                return Ok(());
            }
        }

        Err(RobotsError::Disallowed(url.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::StubService;
    use trawl_core::{FetchResponse, FetcherKind};

    const ROBOTS: &str = "User-agent: *\nDisallow: /private\nCrawl-delay: 2\n\nUser-agent: DataflowKitBot\nDisallow: /bots-only\n";

    fn robots_stub(body: &'static str) -> StubService {
        StubService::new(move |request| {
            if request.is_robots_txt() {
                Ok(FetchResponse::new(FetcherKind::Base, request.url(), 200, body))
            } else {
                Ok(FetchResponse::new(FetcherKind::Base, request.url(), 200, "<html></html>"))
            }
        })
    }

    #[test]
    fn test_policy_groups_by_agent() {
        let policy = RobotsPolicy::parse("DataflowKitBot", "example.com", ROBOTS.as_bytes()).unwrap();
        assert!(!policy.allowed("http://example.com/bots-only/page"));
        assert!(policy.allowed("http://example.com/private"));

        let other = RobotsPolicy::parse("OtherBot", "example.com", ROBOTS.as_bytes()).unwrap();
        assert!(!other.allowed("http://example.com/private"));
        assert_eq!(other.crawl_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_allow_all() {
        let policy = RobotsPolicy::allow_all("DataflowKitBot", "example.com").unwrap();
        assert!(policy.allowed("http://example.com/anything"));
        assert_eq!(policy.crawl_delay(), None);
    }

    #[test]
    fn test_robots_url() {
        let url = Url::parse("https://example.com:8443/a/b?c=d").unwrap();
        assert_eq!(robots_url(&url), "https://example.com:8443/robots.txt");
        let url = Url::parse("http://example.com/a").unwrap();
        assert_eq!(robots_url(&url), "http://example.com/robots.txt");
    }

    #[tokio::test]
    async fn test_disallowed_is_forbidden() {
        let stub = robots_stub("User-agent: *\nDisallow: /\n");
        let checker = RobotsChecker::new("DataflowKitBot");
        let result = checker.check(&stub, &FetchRequest::base("http://example.com/page")).await;
        assert!(matches!(result, Err(Error::ForbiddenByRobots(_))));
        assert!(stub.seen.lock().unwrap().iter().any(|r| r.method() == "HEAD"));
    }

    #[tokio::test]
    async fn test_allowed_skips_head_lookup() {
        let stub = robots_stub(ROBOTS);
        let checker = RobotsChecker::new("DataflowKitBot");
        checker.check(&stub, &FetchRequest::base("http://example.com/public")).await.unwrap();
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_robots_txt_itself_is_not_checked() {
        let stub = robots_stub("User-agent: *\nDisallow: /\n");
        let checker = RobotsChecker::new("DataflowKitBot");
        checker.check(&stub, &FetchRequest::base("http://example.com/robots.txt")).await.unwrap();
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_robots_allows_all() {
        let stub = StubService::new(|request| Err(Error::NotFound(request.url().to_string())));
        let checker = RobotsChecker::new("DataflowKitBot");
        assert!(checker.check(&stub, &FetchRequest::base("http://example.com/a")).await.is_ok());

        let stub = StubService::page(404, "");
        assert!(checker.check(&stub, &FetchRequest::base("http://example.com/a")).await.is_ok());
    }

    #[tokio::test]
    async fn test_robots_server_error_is_fatal() {
        let stub = StubService::new(|request| Err(Error::Timeout(request.url().to_string())));
        let checker = RobotsChecker::new("DataflowKitBot");
        let result = checker.check(&stub, &FetchRequest::base("http://example.com/a")).await;
        assert!(matches!(result, Err(Error::Error(msg)) if msg.contains("robots.txt")));
    }

    #[tokio::test]
    async fn test_redirect_to_allowed_host() {
        let stub = StubService::new(|request| {
            let url = request.url();
            if url == "http://old.example.com/robots.txt" {
                return Ok(FetchResponse::new(FetcherKind::Base, url, 200, "User-agent: *\nDisallow: /\n"));
            }
            if url == "http://new.example.com/robots.txt" {
                return Ok(FetchResponse::new(FetcherKind::Base, url, 200, "User-agent: *\nAllow: /\n"));
            }
            if request.method() == "HEAD" {
                return Ok(FetchResponse::new(FetcherKind::Base, "http://new.example.com/page", 200, ""));
            }
            Ok(FetchResponse::new(FetcherKind::Base, url, 200, "<html></html>"))
        });
        let checker = RobotsChecker::new("DataflowKitBot");
        checker.check(&stub, &FetchRequest::base("http://old.example.com/page")).await.unwrap();
    }
}
