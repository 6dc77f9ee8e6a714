//! Fetch request variants.
//!
//! A request is immutable once built and doubles as the source of its cache
//! key. The `type` tag selects the backend: `base`, `splash` or `chrome`.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::Error;
use crate::cache::key::normalize;
use crate::model::Cookie;

/// Which backend handles (or handled) a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    Base,
    Splash,
    Chrome,
}

impl FetcherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetcherKind::Base => "base",
            FetcherKind::Splash => "splash",
            FetcherKind::Chrome => "chrome",
        }
    }
}

impl std::fmt::Display for FetcherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_method() -> String {
    "GET".into()
}

/// Plain HTTP fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseRequest {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Form-encoded body, e.g. `user=a&pass=b`. Switches the request to POST.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<String>,

    /// Identifies the caller whose cookies are kept between requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_token: Option<String>,

    /// Cookies sent with the request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<Cookie>,
}

/// Fetch through the remote rendering proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_token: Option<String>,

    /// Custom Lua script replacing the default navigate-and-wait script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lua: Option<String>,

    /// Seconds to wait after navigation. Falls back to the configured wait.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<f64>,

    /// Cookies seeded into the renderer before navigation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<Cookie>,

    /// Scroll to the bottom to trigger infinite-scroll content.
    #[serde(default)]
    pub scroll: bool,
}

/// A post-load action run against the live page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserAction {
    /// Click the first element matching `element`.
    Click { element: String },
    /// Click a "next" element up to `pages` times, scrolling between clicks.
    Paginate { selector: String, pages: u32 },
    /// Scroll to the bottom `times` times.
    Scroll { times: u32 },
    /// Remove every node matching `selector` before the HTML is captured.
    Remove { selector: String },
}

/// Fetch through the headless browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserRequest {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_token: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<BrowserAction>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<Cookie>,
}

/// One fetch intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FetchRequest {
    #[serde(rename = "base")]
    Base(BaseRequest),
    #[serde(rename = "splash")]
    Rendered(RenderRequest),
    #[serde(rename = "chrome")]
    Browser(BrowserRequest),
}

impl FetchRequest {
    /// Plain GET request for `url`.
    pub fn base(url: impl Into<String>) -> Self {
        FetchRequest::Base(BaseRequest {
            url: url.into(),
            method: default_method(),
            form_data: None,
            user_token: None,
            cookies: Vec::new(),
        })
    }

    /// Rendered GET request for `url` with default script and wait.
    pub fn rendered(url: impl Into<String>) -> Self {
        FetchRequest::Rendered(RenderRequest {
            url: url.into(),
            method: default_method(),
            form_data: None,
            user_token: None,
            lua: None,
            wait: None,
            cookies: Vec::new(),
            scroll: false,
        })
    }

    /// Browser GET request for `url` without actions.
    pub fn browser(url: impl Into<String>) -> Self {
        FetchRequest::Browser(BrowserRequest {
            url: url.into(),
            method: default_method(),
            form_data: None,
            user_token: None,
            actions: Vec::new(),
            cookies: Vec::new(),
        })
    }

    pub fn kind(&self) -> FetcherKind {
        match self {
            FetchRequest::Base(_) => FetcherKind::Base,
            FetchRequest::Rendered(_) => FetcherKind::Splash,
            FetchRequest::Browser(_) => FetcherKind::Chrome,
        }
    }

    /// Target URL with surrounding whitespace removed.
    pub fn url(&self) -> &str {
        match self {
            FetchRequest::Base(r) => r.url.trim(),
            FetchRequest::Rendered(r) => r.url.trim(),
            FetchRequest::Browser(r) => r.url.trim(),
        }
    }

    /// Effective HTTP method. Form data always means POST.
    pub fn method(&self) -> &str {
        if self.form_data().is_some() {
            return "POST";
        }
        match self {
            FetchRequest::Base(r) => &r.method,
            FetchRequest::Rendered(r) => &r.method,
            FetchRequest::Browser(r) => &r.method,
        }
    }

    pub fn form_data(&self) -> Option<&str> {
        let data = match self {
            FetchRequest::Base(r) => r.form_data.as_deref(),
            FetchRequest::Rendered(r) => r.form_data.as_deref(),
            FetchRequest::Browser(r) => r.form_data.as_deref(),
        };
        data.filter(|d| !d.trim().is_empty())
    }

    pub fn user_token(&self) -> Option<&str> {
        let token = match self {
            FetchRequest::Base(r) => r.user_token.as_deref(),
            FetchRequest::Rendered(r) => r.user_token.as_deref(),
            FetchRequest::Browser(r) => r.user_token.as_deref(),
        };
        token.filter(|t| !t.is_empty())
    }

    /// Cookies supplied with the request.
    pub fn cookies(&self) -> &[Cookie] {
        match self {
            FetchRequest::Base(r) => &r.cookies,
            FetchRequest::Rendered(r) => &r.cookies,
            FetchRequest::Browser(r) => &r.cookies,
        }
    }

    /// Replace the request cookies.
    pub fn with_cookies(mut self, cookies: Vec<Cookie>) -> Self {
        match &mut self {
            FetchRequest::Base(r) => r.cookies = cookies,
            FetchRequest::Rendered(r) => r.cookies = cookies,
            FetchRequest::Browser(r) => r.cookies = cookies,
        }
        self
    }

    /// Cache key: the normalized URL with any trailing slash removed.
    pub fn cache_key(&self) -> String {
        normalize(self.url())
    }

    /// Parse and validate the target URL.
    pub fn parsed_url(&self) -> Result<Url, Error> {
        let raw = self.url();
        if raw.is_empty() {
            return Err(Error::BadRequest("URL is empty".into()));
        }
        let url = Url::parse(raw).map_err(|e| Error::BadRequest(format!("{raw}: {e}")))?;
        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::BadRequest(format!("unsupported scheme: {scheme}"))),
        }
        if url.host_str().is_none() {
            return Err(Error::BadRequest(format!("{raw}: missing host")));
        }
        Ok(url)
    }

    /// Host (and port, if any) of the target URL.
    pub fn host(&self) -> Result<String, Error> {
        let url = self.parsed_url()?;
        let host = url.host_str().unwrap_or_default();
        Ok(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    /// Same request sent with another method and no body.
    pub fn with_method(self, method: &str) -> Self {
        match self {
            FetchRequest::Base(r) => FetchRequest::Base(BaseRequest { method: method.into(), form_data: None, ..r }),
            FetchRequest::Rendered(r) => {
                FetchRequest::Rendered(RenderRequest { method: method.into(), form_data: None, ..r })
            }
            FetchRequest::Browser(r) => {
                FetchRequest::Browser(BrowserRequest { method: method.into(), form_data: None, ..r })
            }
        }
    }

    /// True when the request targets a robots.txt file.
    pub fn is_robots_txt(&self) -> bool {
        is_robots_txt(self.url())
    }

    /// A bodiless GET: the only shape whose response may be shared through
    /// the page cache under [`FetchRequest::cache_key`].
    pub fn is_plain_get(&self) -> bool {
        self.method().eq_ignore_ascii_case("GET") && self.form_data().is_none()
    }
}

/// True when `url` points at a robots.txt file.
pub fn is_robots_txt(url: &str) -> bool {
    url.trim().trim_end_matches('/').ends_with("robots.txt")
}
