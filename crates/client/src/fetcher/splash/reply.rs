//! Shapes returned by the rendering service.

use std::collections::BTreeMap;

use serde::Deserialize;
use trawl_core::{Cookie, Error, HeaderSnapshot};

/// Headers as sent by the service: HAR-style `[{name, value}]` pairs or a
/// `{name: [values]}` map, depending on which script produced them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawHeaders {
    List(Vec<HeaderPair>),
    Map(BTreeMap<String, HeaderValues>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderPair {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

impl RawHeaders {
    pub fn normalize(&self) -> HeaderSnapshot {
        let mut snapshot = HeaderSnapshot::new();
        match self {
            RawHeaders::List(pairs) => {
                for pair in pairs {
                    snapshot.append(&pair.name, pair.value.clone());
                }
            }
            RawHeaders::Map(map) => {
                for (name, values) in map {
                    match values {
                        HeaderValues::One(value) => snapshot.append(name, value.clone()),
                        HeaderValues::Many(values) => {
                            for value in values {
                                snapshot.append(name, value.clone());
                            }
                        }
                    }
                }
            }
        }
        snapshot
    }
}

fn normalize(headers: &Option<RawHeaders>) -> HeaderSnapshot {
    headers.as_ref().map(RawHeaders::normalize).unwrap_or_default()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: Option<RawHeaders>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyContent {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyResponse {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub headers: Option<RawHeaders>,
    #[serde(default)]
    pub content: Option<ReplyContent>,
}

/// Result of one `execute` call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reply {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub html: String,
    /// Render failure reported by the script, e.g. `http404`.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub request: Option<ReplyRequest>,
    #[serde(default)]
    pub response: Option<ReplyResponse>,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
}

impl Reply {
    pub fn request_headers(&self) -> HeaderSnapshot {
        self.request.as_ref().map(|r| normalize(&r.headers)).unwrap_or_default()
    }

    pub fn response_headers(&self) -> HeaderSnapshot {
        self.response.as_ref().map(|r| normalize(&r.headers)).unwrap_or_default()
    }

    /// The service occasionally returns a rendered page without any
    /// history entries. Garbage-collecting the service and retrying fixes it.
    pub fn is_detached(&self) -> bool {
        self.request.is_none() && self.response.is_none() && !self.html.is_empty()
    }

    /// Translate a script-reported failure into a typed error.
    pub fn check(&self, url: &str) -> Result<(), Error> {
        let Some(reason) = self.error.as_deref().filter(|e| !e.is_empty()) else {
            return Ok(());
        };
        Err(match reason {
            "http404" => Error::NotFound(url.to_string()),
            "http403" => Error::Forbidden(url.to_string()),
            r if r.starts_with("network") => Error::Error(format!("{url}: {r}")),
            r if r.starts_with("render_timeout") => Error::GatewayTimeout(url.to_string()),
            r => Error::Error(format!("{url}: render failed: {r}")),
        })
    }
}

/// Body of a non-200 reply from the service itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceError {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub info: Option<serde_json::Value>,
}

impl ServiceError {
    pub fn message(&self) -> String {
        let mut out = self.kind.clone().unwrap_or_else(|| "error".into());
        if let Some(description) = &self.description {
            out.push_str(": ");
            out.push_str(description);
        }
        if let Some(info) = &self.info {
            out.push_str(&format!(" ({info})"));
        }
        out
    }
}

/// `/_ping` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct PingResponse {
    #[serde(default)]
    pub maxrss: u64,
    pub status: String,
}
