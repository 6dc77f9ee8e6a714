//! Request and response types passed through the fetch pipeline.

mod headers;
mod request;
mod response;

pub use headers::HeaderSnapshot;
pub use request::{BaseRequest, BrowserAction, BrowserRequest, FetchRequest, FetcherKind, RenderRequest, is_robots_txt};
pub use response::{Cookie, FetchResponse, status_text};
