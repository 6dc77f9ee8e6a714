//! Cassandra store over the scylla driver.
//!
//! Each record kind has its own table. Intermediate results use a
//! composite primary key `(payload_hash, page_id, block_id)` parsed from
//! keys of the form `hash-page-block`; other intermediate keys (payload
//! maps) go to `intermediate_maps`. Rows are written `USING TTL` and
//! disappear on expiry, so there is no freshness check beyond existence.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::{Session, SessionBuilder};

use super::{RecordKey, RecordKind, Store, StoreError};
use crate::config::StorageType;

/// Longest TTL Cassandra accepts (20 years).
const MAX_TTL_SECS: i64 = 630_720_000;

const TABLES: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS cache (key text PRIMARY KEY, value blob)",
    "CREATE TABLE IF NOT EXISTS cookies (key text PRIMARY KEY, value blob)",
    "CREATE TABLE IF NOT EXISTS stats (key text PRIMARY KEY, value blob)",
    "CREATE TABLE IF NOT EXISTS intermediate (payload_hash text, page_id int, block_id int, value blob, \
     PRIMARY KEY (payload_hash, page_id, block_id))",
    "CREATE TABLE IF NOT EXISTS intermediate_maps (payload_hash text PRIMARY KEY, value blob)",
];

pub struct CassandraStore {
    session: Session,
    default_ttl: Duration,
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::backend(StorageType::Cassandra, err)
}

/// Where a record lives.
enum Row<'a> {
    Keyed { table: &'static str, key: &'a str },
    Block { hash: &'a str, page: i32, block: i32 },
    Map { hash: &'a str },
}

impl<'a> Row<'a> {
    fn locate(key: &'a RecordKey) -> Self {
        match key.kind {
            RecordKind::Cache => Row::Keyed { table: "cache", key: &key.key },
            RecordKind::Cookies => Row::Keyed { table: "cookies", key: &key.key },
            RecordKind::Stats => Row::Keyed { table: "stats", key: &key.key },
            RecordKind::Intermediate => match key.intermediate_parts() {
                Ok((hash, page, block)) => Row::Block { hash, page, block },
                Err(_) => Row::Map { hash: &key.key },
            },
        }
    }
}

impl CassandraStore {
    /// Connect, creating the keyspace and tables when missing.
    /// `default_ttl` applies when a write's expiry is already past.
    pub async fn connect(nodes: &[String], keyspace: &str, default_ttl: Duration) -> Result<Self, StoreError> {
        if keyspace.is_empty() || !keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::backend(StorageType::Cassandra, format!("invalid keyspace {keyspace:?}")));
        }

        let session = SessionBuilder::new().known_nodes(nodes).build().await.map_err(backend)?;
        session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH replication = \
                     {{'class': 'SimpleStrategy', 'replication_factor': 1}}"
                ),
                (),
            )
            .await
            .map_err(backend)?;
        session.use_keyspace(keyspace, false).await.map_err(backend)?;
        for ddl in TABLES {
            session.query_unpaged(ddl, ()).await.map_err(backend)?;
        }

        tracing::debug!(keyspace, nodes = nodes.len(), "cassandra store ready");
        Ok(Self { session, default_ttl })
    }

    fn ttl_secs(&self, expires: DateTime<Utc>) -> i32 {
        let secs = (expires - Utc::now()).num_seconds();
        let secs = if secs > 0 { secs } else { self.default_ttl.as_secs() as i64 };
        secs.clamp(1, MAX_TTL_SECS) as i32
    }

    async fn fetch(&self, key: &RecordKey) -> Result<Option<Vec<u8>>, StoreError> {
        let result = match Row::locate(key) {
            Row::Keyed { table, key } => {
                self.session.query_unpaged(format!("SELECT value FROM {table} WHERE key = ?"), (key,)).await
            }
            Row::Block { hash, page, block } => {
                self.session
                    .query_unpaged(
                        "SELECT value FROM intermediate WHERE payload_hash = ? AND page_id = ? AND block_id = ?",
                        (hash, page, block),
                    )
                    .await
            }
            Row::Map { hash } => {
                self.session.query_unpaged("SELECT value FROM intermediate_maps WHERE payload_hash = ?", (hash,)).await
            }
        }
        .map_err(backend)?;

        let rows = result.into_rows_result().map_err(backend)?;
        let row = rows.maybe_first_row::<(Vec<u8>,)>().map_err(backend)?;
        Ok(row.map(|(value,)| value))
    }
}

#[async_trait]
impl Store for CassandraStore {
    fn engine(&self) -> StorageType {
        StorageType::Cassandra
    }

    async fn read(&self, key: &RecordKey) -> Result<Vec<u8>, StoreError> {
        self.fetch(key).await?.ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn write(&self, key: &RecordKey, value: &[u8], expires: DateTime<Utc>) -> Result<(), StoreError> {
        let ttl = self.ttl_secs(expires);
        match Row::locate(key) {
            Row::Keyed { table, key } => {
                let cql = format!("INSERT INTO {table} (key, value) VALUES (?, ?) USING TTL ?");
                self.session.query_unpaged(cql, (key, value.to_vec(), ttl)).await
            }
            Row::Block { hash, page, block } => {
                self.session
                    .query_unpaged(
                        "INSERT INTO intermediate (payload_hash, page_id, block_id, value) VALUES (?, ?, ?, ?) USING TTL ?",
                        (hash, page, block, value.to_vec(), ttl),
                    )
                    .await
            }
            Row::Map { hash } => {
                self.session
                    .query_unpaged(
                        "INSERT INTO intermediate_maps (payload_hash, value) VALUES (?, ?) USING TTL ?",
                        (hash, value.to_vec(), ttl),
                    )
                    .await
            }
        }
        .map_err(backend)?;
        Ok(())
    }

    async fn expired(&self, key: &RecordKey) -> bool {
        match self.fetch(key).await {
            Ok(row) => row.is_none(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cassandra lookup failed");
                true
            }
        }
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        match Row::locate(key) {
            Row::Keyed { table, key } => {
                self.session.query_unpaged(format!("DELETE FROM {table} WHERE key = ?"), (key,)).await
            }
            Row::Block { hash, page, block } => {
                self.session
                    .query_unpaged(
                        "DELETE FROM intermediate WHERE payload_hash = ? AND page_id = ? AND block_id = ?",
                        (hash, page, block),
                    )
                    .await
            }
            Row::Map { hash } => {
                self.session.query_unpaged("DELETE FROM intermediate_maps WHERE payload_hash = ?", (hash,)).await
            }
        }
        .map_err(backend)?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        for table in ["cache", "cookies", "stats", "intermediate", "intermediate_maps"] {
            self.session.query_unpaged(format!("TRUNCATE {table}"), ()).await.map_err(backend)?;
        }
        Ok(())
    }
}
