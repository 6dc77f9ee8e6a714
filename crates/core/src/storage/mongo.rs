//! MongoDB store: one collection per record kind, one document per key.
//!
//! Documents are not time-limited. A record stays fresh until it is
//! deleted, so `expired` only reports whether the document exists.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{self, Binary, Document, doc};
use mongodb::{Client, Collection, Database};

use super::{RecordKey, Store, StoreError};
use crate::config::StorageType;

pub struct MongoStore {
    client: Client,
    db: Database,
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::backend(StorageType::Mongo, err)
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await.map_err(backend)?;
        let db = client.database(database);
        Ok(Self { client, db })
    }

    fn collection(&self, key: &RecordKey) -> Collection<Document> {
        self.db.collection(key.kind.as_str())
    }
}

#[async_trait]
impl Store for MongoStore {
    fn engine(&self) -> StorageType {
        StorageType::Mongo
    }

    async fn read(&self, key: &RecordKey) -> Result<Vec<u8>, StoreError> {
        let found = self.collection(key).find_one(doc! { "uid": &key.key }).await.map_err(backend)?;
        let document = found.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let value = document.get_binary_generic("value").map_err(backend)?;
        Ok(value.clone())
    }

    async fn write(&self, key: &RecordKey, value: &[u8], expires: DateTime<Utc>) -> Result<(), StoreError> {
        let replacement = doc! {
            "uid": &key.key,
            "value": Binary { subtype: BinarySubtype::Generic, bytes: value.to_vec() },
            "expires": bson::DateTime::from_millis(expires.timestamp_millis()),
        };
        self.collection(key)
            .replace_one(doc! { "uid": &key.key }, replacement)
            .upsert(true)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn expired(&self, key: &RecordKey) -> bool {
        match self.collection(key).find_one(doc! { "uid": &key.key }).await {
            Ok(found) => found.is_none(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "mongo lookup failed");
                true
            }
        }
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        self.collection(key).delete_one(doc! { "uid": &key.key }).await.map_err(backend)?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.db.drop().await.map_err(backend)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}
