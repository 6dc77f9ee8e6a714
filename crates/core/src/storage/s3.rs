//! S3-compatible object store. One object per record under
//! `<kind>/<sha256(key)>`; freshness is the object's `LastModified` plus a
//! fixed lifetime. The per-record expiry is attached as object metadata
//! only.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
use chrono::{DateTime, Utc};

use super::{RecordKey, RecordKind, Store, StoreError};
use crate::cache::digest;
use crate::config::{StorageConfig, StorageType};

pub struct S3Store {
    client: Client,
    bucket: String,
    lifetime: Duration,
}

fn backend(err: impl std::error::Error) -> StoreError {
    StoreError::backend(StorageType::S3, DisplayErrorContext(err))
}

impl S3Store {
    /// Build a client from the ambient AWS configuration, overriding region
    /// and endpoint when configured.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StoreError> {
        let bucket = config
            .s3_bucket
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| StoreError::backend(StorageType::S3, "bucket is not configured"))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.s3_region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.s3_endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self::with_client(Client::from_conf(builder.build()), bucket, config.expire()))
    }

    pub fn with_client(client: Client, bucket: impl Into<String>, lifetime: Duration) -> Self {
        Self { client, bucket: bucket.into(), lifetime }
    }

    fn object_key(key: &RecordKey) -> String {
        format!("{}/{}", key.kind.as_str(), digest(&key.key))
    }

    async fn last_modified(&self, key: &RecordKey) -> Option<DateTime<Utc>> {
        let head = self.client.head_object().bucket(&self.bucket).key(Self::object_key(key)).send().await.ok()?;
        let modified = head.last_modified()?;
        DateTime::from_timestamp(modified.secs(), modified.subsec_nanos())
    }
}

#[async_trait]
impl Store for S3Store {
    fn engine(&self) -> StorageType {
        StorageType::S3
    }

    async fn read(&self, key: &RecordKey) -> Result<Vec<u8>, StoreError> {
        let output = match self.client.get_object().bucket(&self.bucket).key(Self::object_key(key)).send().await {
            Ok(output) => output,
            Err(e) => {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    return Err(StoreError::NotFound(key.to_string()));
                }
                return Err(backend(service));
            }
        };
        let body = output.body.collect().await.map_err(backend)?;
        Ok(body.into_bytes().to_vec())
    }

    async fn write(&self, key: &RecordKey, value: &[u8], expires: DateTime<Utc>) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::object_key(key))
            .body(ByteStream::from(value.to_vec()))
            .expires(AwsDateTime::from_secs(expires.timestamp()))
            .metadata("record-key", urlencoding_safe(&key.key))
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn expired(&self, key: &RecordKey) -> bool {
        match self.last_modified(key).await {
            Some(modified) => match chrono::Duration::from_std(self.lifetime) {
                Ok(lifetime) => modified + lifetime <= Utc::now(),
                Err(_) => false,
            },
            None => true,
        }
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        self.client.delete_object().bucket(&self.bucket).key(Self::object_key(key)).send().await.map_err(backend)?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        for kind in RecordKind::ALL {
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(format!("{}/", kind.as_str()))
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = page.map_err(backend)?;
                for object in page.contents() {
                    if let Some(object_key) = object.key() {
                        self.client.delete_object().bucket(&self.bucket).key(object_key).send().await.map_err(backend)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Object metadata must be ASCII: keep printable ASCII, percent-escape
/// every other byte.
fn urlencoding_safe(raw: &str) -> String {
    raw.bytes()
        .map(|b| if b.is_ascii_graphic() { (b as char).to_string() } else { format!("%{b:02X}") })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::never_expires;

    #[test]
    fn test_object_key_layout() {
        let key = S3Store::object_key(&RecordKey::cache("http://example.com"));
        assert!(key.starts_with("cache/"));
        assert_eq!(key.len(), "cache/".len() + 64);
    }

    #[test]
    fn test_metadata_value_is_ascii() {
        assert_eq!(urlencoding_safe("http://example.com/a b"), "http://example.com/a%20b");
        assert!(urlencoding_safe("http://пример.рф").is_ascii());
    }

    #[tokio::test]
    #[ignore = "requires an S3-compatible endpoint (TRAWL_TEST_S3_ENDPOINT, TRAWL_TEST_S3_BUCKET)"]
    async fn test_round_trip_against_endpoint() {
        let config = StorageConfig {
            kind: StorageType::S3,
            s3_bucket: std::env::var("TRAWL_TEST_S3_BUCKET").ok(),
            s3_endpoint: std::env::var("TRAWL_TEST_S3_ENDPOINT").ok(),
            s3_region: Some("us-east-1".into()),
            ..Default::default()
        };
        let store = S3Store::connect(&config).await.unwrap();
        let key = RecordKey::cache("http://example.com/s3-round-trip");

        store.delete(&key).await.unwrap();
        assert!(store.expired(&key).await);
        assert!(matches!(store.read(&key).await, Err(StoreError::NotFound(_))));

        store.write(&key, b"<html>s3</html>", never_expires()).await.unwrap();
        assert!(!store.expired(&key).await);
        assert_eq!(store.read(&key).await.unwrap(), b"<html>s3</html>");
    }
}
