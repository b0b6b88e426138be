//! Snapshot metadata service.
//!
//! Each published catalogue snapshot (a zstd-compressed SQLite file in blob
//! storage) gets one row in `snapshot_metadata`. Mobile clients ask for the
//! newest row to decide whether to download.

use crate::db::{JsonRow, PoolProvider, QueryParam};
use crate::error::{DbError, DbResult};
use crate::hash::sha256_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

const INSERT_SNAPSHOT_SQL: &str = "INSERT INTO snapshot_metadata (
    schema_version,
    snapshot_version,
    blob_path,
    size_bytes,
    sha256,
    counts,
    created_at
) VALUES ($1, $2, $3, $4, $5, $6::jsonb, $7::timestamptz)";

const LATEST_SNAPSHOT_SQL: &str = "SELECT schema_version, snapshot_version, blob_path, size_bytes, sha256, counts, created_at
    FROM snapshot_metadata
    ORDER BY created_at DESC
    LIMIT 1";

/// Row counts of the tables inside a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotCounts {
    pub drinks: i64,
    pub ingredients: i64,
    pub measures: i64,
    pub categories: i64,
    pub glasses: i64,
    pub tags: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub schema_version: String,
    /// `YYYYMMDD.HHMMSS` in UTC
    pub snapshot_version: String,
    pub blob_path: String,
    pub size_bytes: i64,
    /// Hex SHA-256 of the compressed blob
    pub sha256: String,
    pub counts: SnapshotCounts,
    pub created_at_utc: DateTime<Utc>,
}

/// Shape of a `snapshot_metadata` row as decoded from the database.
#[derive(Debug, Deserialize)]
struct SnapshotRow {
    schema_version: String,
    snapshot_version: String,
    blob_path: String,
    size_bytes: Option<i64>,
    sha256: String,
    counts: Option<SnapshotCounts>,
    created_at: DateTime<Utc>,
}

impl SnapshotMetadata {
    /// Describe a freshly built snapshot.
    ///
    /// Size and checksum are taken from `compressed`, the bytes that are
    /// uploaded; version and blob path are derived from `created_at`.
    pub fn for_payload(
        schema_version: impl Into<String>,
        compressed: &[u8],
        counts: SnapshotCounts,
        created_at: DateTime<Utc>,
    ) -> Self {
        let schema_version = schema_version.into();
        let snapshot_version = snapshot_version(created_at);
        let blob_path = blob_path(&schema_version, &snapshot_version);

        Self {
            schema_version,
            snapshot_version,
            blob_path,
            size_bytes: compressed.len() as i64,
            sha256: sha256_hex(compressed),
            counts,
            created_at_utc: created_at,
        }
    }

    /// Decode one `snapshot_metadata` row.
    pub fn from_row(row: JsonRow) -> DbResult<Self> {
        let row: SnapshotRow = serde_json::from_value(JsonValue::Object(row))
            .map_err(|e| DbError::internal(format!("Malformed snapshot_metadata row: {e}")))?;

        Ok(Self {
            schema_version: row.schema_version,
            snapshot_version: row.snapshot_version,
            blob_path: row.blob_path,
            size_bytes: row.size_bytes.unwrap_or(0),
            sha256: row.sha256,
            counts: row.counts.unwrap_or_default(),
            created_at_utc: row.created_at,
        })
    }

    fn insert_params(&self) -> DbResult<Vec<QueryParam>> {
        let counts = serde_json::to_value(&self.counts)
            .map_err(|e| DbError::internal(format!("Failed to encode snapshot counts: {e}")))?;

        Ok(vec![
            self.schema_version.as_str().into(),
            self.snapshot_version.as_str().into(),
            self.blob_path.as_str().into(),
            self.size_bytes.into(),
            self.sha256.as_str().into(),
            counts.into(),
            self.created_at_utc.to_rfc3339().into(),
        ])
    }
}

/// Snapshot version for a build started at `at`, e.g. `20251010.010203`.
pub fn snapshot_version(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d.%H%M%S").to_string()
}

/// Blob path a snapshot is uploaded to.
pub fn blob_path(schema_version: &str, snapshot_version: &str) -> String {
    format!("snapshots/sqlite/{schema_version}/{snapshot_version}.db.zst")
}

/// Insert one metadata row inside a transaction.
pub async fn record_snapshot_metadata(
    provider: &PoolProvider,
    metadata: &SnapshotMetadata,
) -> DbResult<()> {
    let params = metadata.insert_params()?;

    provider
        .with_transaction(move |conn| {
            Box::pin(async move {
                conn.execute(INSERT_SNAPSHOT_SQL, &params).await?;
                Ok::<_, DbError>(())
            })
        })
        .await?;

    tracing::info!(
        snapshot_version = %metadata.snapshot_version,
        size_bytes = metadata.size_bytes,
        "Recorded snapshot metadata"
    );
    Ok(())
}

/// Newest snapshot by `created_at`, or `None` when nothing was published yet.
pub async fn latest_snapshot_metadata(
    provider: &PoolProvider,
) -> DbResult<Option<SnapshotMetadata>> {
    let pool = provider.get_pool().await?;
    let mut conn = pool.acquire().await?;
    let row = conn.fetch_optional(LATEST_SNAPSHOT_SQL, &[]).await;
    conn.release().await;

    row?.map(SnapshotMetadata::from_row).transpose()
}
