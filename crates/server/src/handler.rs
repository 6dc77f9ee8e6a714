//! HTTP endpoint in front of the fetch pipeline.
//!
//! - `POST /fetch` returns the page HTML
//! - `POST /response` returns the full response as JSON
//! - `GET /ping` reports liveness
//!
//! Request bodies are JSON [`FetchRequest`]s. A body without a `type`
//! field is treated as a base request.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use trawl_client::FetchService;
use trawl_core::{Error, FetchRequest, FetchResponse};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn FetchService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/fetch", post(fetch_html))
        .route("/response", post(fetch_response))
        .route("/ping", get(ping))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parse a request body, defaulting the variant tag to `base`.
pub fn decode_request(body: &[u8]) -> Result<FetchRequest, Error> {
    let mut value: Value = serde_json::from_slice(body).map_err(|e| Error::BadRequest(format!("invalid JSON: {e}")))?;
    let Some(object) = value.as_object_mut() else {
        return Err(Error::BadRequest("request body must be a JSON object".into()));
    };
    object.entry("type").or_insert_with(|| Value::from("base"));
    let request: FetchRequest =
        serde_json::from_value(value).map_err(|e| Error::BadRequest(format!("invalid request: {e}")))?;
    request.parsed_url()?;
    Ok(request)
}

async fn fetch_html(State(state): State<AppState>, body: Bytes) -> Result<Html<String>, ApiError> {
    let request = decode_request(&body)?;
    Ok(Html(state.service.fetch(&request).await?))
}

async fn fetch_response(State(state): State<AppState>, body: Bytes) -> Result<Json<FetchResponse>, ApiError> {
    let request = decode_request(&body)?;
    let resp = state.service.response(&request).await?.ensure_found()?;
    Ok(Json(resp))
}

async fn ping() -> Json<Value> {
    Json(json!({ "alive": true }))
}
