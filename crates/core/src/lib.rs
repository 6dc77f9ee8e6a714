//! Core types and shared functionality for trawl.
//!
//! This crate provides:
//! - Request/response model shared by every fetcher
//! - HTTP cache-freshness evaluation and cache keys
//! - Storage engines behind the `Store` trait
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;

pub use config::{AppConfig, StorageType};
pub use error::Error;
pub use model::{Cookie, FetchRequest, FetchResponse, FetcherKind, HeaderSnapshot};
pub use storage::{RecordKey, RecordKind, Store, StoreError, open_store};
