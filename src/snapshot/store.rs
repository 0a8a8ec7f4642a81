//! Schema Snapshot Store
//!
//! Write-once, read-many persistence of snapshots keyed by an integer id.
//! Ids are assigned by the store, start at 1 and only ever grow.

use crate::error::AppError;
use crate::snapshot::model::Snapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A snapshot together with its store id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub id: i64,
    pub snapshot: Snapshot,
}

/// Metadata about a snapshot (lightweight, used for listing)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub id: i64,
    pub schema_name: String,
    pub crawl_timestamp: DateTime<Utc>,
    pub table_count: usize,
    pub column_count: usize,
    pub checksum: String,
}

impl SnapshotMetadata {
    pub fn describe(id: i64, snapshot: &Snapshot) -> Self {
        Self {
            id,
            schema_name: snapshot.schema_name.clone(),
            crawl_timestamp: snapshot.crawl_timestamp,
            table_count: snapshot.tables.len(),
            column_count: snapshot.column_count(),
            checksum: snapshot.checksum(),
        }
    }
}

/// Storage seam for snapshots.
///
/// Implementations must never rewrite a snapshot once an id is handed out.
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot and return its new id
    fn put(&self, snapshot: &Snapshot) -> Result<i64, AppError>;

    /// Load one snapshot, `SnapshotNotFound` when the id is unknown
    fn get(&self, id: i64) -> Result<Snapshot, AppError>;

    /// Up to `count` snapshots, newest crawl first (ties broken by id)
    fn latest(&self, count: usize) -> Result<Vec<StoredSnapshot>, AppError>;

    /// Metadata for every snapshot, newest first
    fn list(&self) -> Result<Vec<SnapshotMetadata>, AppError>;

    /// Delete snapshots crawled strictly before `cutoff`, returning how many went
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AppError>;
}

#[derive(Default)]
struct MemoryInner {
    last_id: i64,
    snapshots: BTreeMap<i64, Snapshot>,
}

impl MemoryInner {
    fn newest_first(&self) -> Vec<(i64, &Snapshot)> {
        let mut entries: Vec<(i64, &Snapshot)> =
            self.snapshots.iter().map(|(id, s)| (*id, s)).collect();
        entries.sort_by(|a, b| {
            b.1.crawl_timestamp
                .cmp(&a.1.crawl_timestamp)
                .then_with(|| b.0.cmp(&a.0))
        });
        entries
    }
}

/// In-process store for tests and throwaway runs
#[derive(Default)]
pub struct MemorySnapshotStore {
    inner: RwLock<MemoryInner>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryInner>, AppError> {
        self.inner
            .read()
            .map_err(|e| AppError::Internal(format!("Snapshot store lock poisoned: {}", e)))
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn put(&self, snapshot: &Snapshot) -> Result<i64, AppError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| AppError::Internal(format!("Snapshot store lock poisoned: {}", e)))?;

        inner.last_id += 1;
        let id = inner.last_id;
        inner.snapshots.insert(id, snapshot.clone());

        tracing::info!(
            "Saved snapshot {} for schema {}: {} tables",
            id,
            snapshot.schema_name,
            snapshot.tables.len()
        );
        Ok(id)
    }

    fn get(&self, id: i64) -> Result<Snapshot, AppError> {
        self.read()?
            .snapshots
            .get(&id)
            .cloned()
            .ok_or(AppError::SnapshotNotFound(id))
    }

    fn latest(&self, count: usize) -> Result<Vec<StoredSnapshot>, AppError> {
        let inner = self.read()?;
        Ok(inner
            .newest_first()
            .into_iter()
            .take(count)
            .map(|(id, snapshot)| StoredSnapshot {
                id,
                snapshot: snapshot.clone(),
            })
            .collect())
    }

    fn list(&self) -> Result<Vec<SnapshotMetadata>, AppError> {
        let inner = self.read()?;
        Ok(inner
            .newest_first()
            .into_iter()
            .map(|(id, snapshot)| SnapshotMetadata::describe(id, snapshot))
            .collect())
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AppError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| AppError::Internal(format!("Snapshot store lock poisoned: {}", e)))?;

        let before = inner.snapshots.len();
        inner.snapshots.retain(|_, s| s.crawl_timestamp >= cutoff);
        let removed = before - inner.snapshots.len();

        tracing::info!("Pruned {} snapshots crawled before {}", removed, cutoff);
        Ok(removed)
    }
}
