//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryArtifactStore` and `MemoryVersionStore` that satisfy the
//! trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryArtifactStore
// ---------------------------------------------------------------------------

/// In-memory artifact store backed by a `HashMap<key, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes under `key`, replacing any previous artifact.
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        let mut artifacts = self.artifacts.lock().unwrap();
        artifacts.insert(key.into(), data);
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn download(&self, key: &str) -> StorageResult<Vec<u8>> {
        let artifacts = self.artifacts.lock().unwrap();
        artifacts
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// MemoryVersionStore
// ---------------------------------------------------------------------------

/// One write observed by `MemoryVersionStore`, in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusWrite {
    pub version_id: VersionId,
    pub status: ValidationStatus,
    pub message: Option<String>,
    pub with_result: bool,
}

/// In-memory version store backed by a `HashMap<VersionId, VersionEntry>`.
///
/// Also keeps the full write log so tests can assert on transitions.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    entries: Mutex<HashMap<VersionId, VersionEntry>>,
    writes: Mutex<Vec<StatusWrite>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All writes so far, oldest first.
    pub fn writes(&self) -> Vec<StatusWrite> {
        self.writes.lock().unwrap().clone()
    }

    /// Writes for one version, oldest first.
    pub fn writes_for(&self, version_id: VersionId) -> Vec<StatusWrite> {
        self.writes()
            .into_iter()
            .filter(|w| w.version_id == version_id)
            .collect()
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn set_status(
        &self,
        version_id: VersionId,
        status: ValidationStatus,
        message: Option<String>,
    ) -> StorageResult<()> {
        let entry = VersionEntry {
            version_id,
            status,
            message: message.clone(),
            result: None,
            updated_at: Utc::now(),
        };
        self.entries.lock().unwrap().insert(version_id, entry);
        self.writes.lock().unwrap().push(StatusWrite {
            version_id,
            status,
            message,
            with_result: false,
        });
        Ok(())
    }

    async fn set_result(
        &self,
        version_id: VersionId,
        record: &ValidationRecord,
    ) -> StorageResult<()> {
        let entry = VersionEntry {
            version_id,
            status: record.status,
            message: record.error_message.clone(),
            result: Some(record.clone()),
            updated_at: Utc::now(),
        };
        self.entries.lock().unwrap().insert(version_id, entry);
        self.writes.lock().unwrap().push(StatusWrite {
            version_id,
            status: record.status,
            message: record.error_message.clone(),
            with_result: true,
        });
        Ok(())
    }

    async fn get(&self, version_id: VersionId) -> StorageResult<Option<VersionEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(&version_id).cloned())
    }
}
