//! SurrealDB-backed VersionStore implementation
//!
//! Persists one `validations` row per version id. Rows are replaced inside a
//! transaction so concurrent writers observe last-write-wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::storage_traits::{
    StorageResult, ValidationRecord, ValidationStatus, VersionEntry, VersionId, VersionStore,
};

const NAMESPACE: &str = "codegate";
const DATABASE: &str = "main";
const DEFAULT_LOCAL_PATH: &str = ".codegate/db";

/// Database row for the `validations` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<surrealdb::sql::Thing>,
    version_id: VersionId,
    status: String,
    message: Option<String>,
    result: Option<ValidationRecord>,
    /// RFC 3339 timestamp
    updated_at: String,
}

impl VersionRow {
    fn new(
        version_id: VersionId,
        status: ValidationStatus,
        message: Option<String>,
        result: Option<ValidationRecord>,
    ) -> Self {
        Self {
            id: None,
            version_id,
            status: status.as_str().to_string(),
            message,
            result,
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    fn into_entry(self) -> StorageResult<VersionEntry> {
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StorageError::Backend(format!("bad updated_at: {e}")))?;
        Ok(VersionEntry {
            version_id: self.version_id,
            status: self.status.parse()?,
            message: self.message,
            result: self.result,
            updated_at,
        })
    }
}

/// SurrealDB-backed implementation of [`VersionStore`].
pub struct SurrealVersionStore {
    db: Surreal<Any>,
}

impl SurrealVersionStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> Result<Self, StateError> {
        let store = Self::connect("mem://").await?;
        info!("SurrealVersionStore connected (in-memory)");
        Ok(store)
    }

    /// Create from environment variables.
    ///
    /// Uses `SURREALDB_URL` when set, otherwise local persistence under
    /// `.codegate/db`.
    pub async fn from_env() -> Result<Self, StateError> {
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            let store = Self::connect(&url).await?;
            info!("SurrealVersionStore connected ({})", url);
            return Ok(store);
        }

        std::fs::create_dir_all(DEFAULT_LOCAL_PATH).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {}: {}",
                DEFAULT_LOCAL_PATH, e
            ))
        })?;
        let url = format!("surrealkv://{}", DEFAULT_LOCAL_PATH);
        info!("No SURREALDB_URL found, using local persistence: {}", url);
        Self::connect(&url).await
    }

    /// Connect to an explicit endpoint (`mem://`, `surrealkv://path`, `ws://host`).
    pub async fn connect(url: &str) -> Result<Self, StateError> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        Ok(Self { db })
    }

    async fn replace_row(&self, row: VersionRow) -> StorageResult<()> {
        let vid = row.version_id;
        debug!(version_id = vid, status = %row.status, "writing validation row");

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE validations WHERE version_id = $vid; \
                 CREATE validations CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("vid", vid))
            .bind(("row", row))
            .await?
            .check()?;

        Ok(())
    }
}

#[async_trait]
impl VersionStore for SurrealVersionStore {
    async fn set_status(
        &self,
        version_id: VersionId,
        status: ValidationStatus,
        message: Option<String>,
    ) -> StorageResult<()> {
        self.replace_row(VersionRow::new(version_id, status, message, None))
            .await
    }

    async fn set_result(
        &self,
        version_id: VersionId,
        record: &ValidationRecord,
    ) -> StorageResult<()> {
        let row = VersionRow::new(
            version_id,
            record.status,
            record.error_message.clone(),
            Some(record.clone()),
        );
        self.replace_row(row).await
    }

    async fn get(&self, version_id: VersionId) -> StorageResult<Option<VersionEntry>> {
        let mut res = self
            .db
            .query("SELECT * FROM validations WHERE version_id = $vid")
            .bind(("vid", version_id))
            .await?;

        let rows: Vec<VersionRow> = res.take(0)?;
        rows.into_iter().next().map(VersionRow::into_entry).transpose()
    }
}
