//! SQLite snapshot store.
//!
//! The `schema_snapshots.snapshot_data` JSON document is authoritative.
//! `table_metadata` and `column_metadata` are a denormalized index written in
//! the same transaction and only used for listing.

use crate::error::AppError;
use crate::snapshot::model::Snapshot;
use crate::snapshot::store::{SnapshotMetadata, SnapshotStore, StoredSnapshot};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    schema_name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    snapshot_data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS table_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL,
    table_name TEXT NOT NULL,
    table_type TEXT,
    table_owner TEXT,
    FOREIGN KEY (snapshot_id) REFERENCES schema_snapshots (id)
);

CREATE TABLE IF NOT EXISTS column_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_id INTEGER NOT NULL,
    column_name TEXT NOT NULL,
    data_type TEXT NOT NULL,
    is_nullable BOOLEAN,
    column_default TEXT,
    ordinal_position INTEGER,
    character_maximum_length INTEGER,
    FOREIGN KEY (table_id) REFERENCES table_metadata (id)
);

CREATE INDEX IF NOT EXISTS idx_schema_snapshots_timestamp ON schema_snapshots (timestamp);
CREATE INDEX IF NOT EXISTS idx_table_metadata_snapshot ON table_metadata (snapshot_id);
CREATE INDEX IF NOT EXISTS idx_column_metadata_table ON column_metadata (table_id);
"#;

/// Timestamps are stored in one fixed RFC 3339 shape so that text ordering
/// matches time ordering.
fn timestamp_key(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Snapshot store backed by a single SQLite file
#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    /// Open (creating when missing) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Config(format!(
                    "Cannot create snapshot directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        info!("Snapshot store opened at {}", path.display());

        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), AppError> {
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.connection
            .lock()
            .map_err(|e| AppError::Internal(format!("Failed to acquire snapshot store lock: {}", e)))
    }

    /// Run `f` inside a transaction, rolling back on error.
    fn transaction<F, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Connection) -> Result<T, AppError>,
    {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        match f(&tx) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }

    fn decode(id: i64, document: &str) -> Result<Snapshot, AppError> {
        Snapshot::from_json(document).map_err(|e| AppError::malformed(id, e))
    }

    fn write_index(conn: &Connection, snapshot_id: i64, snapshot: &Snapshot) -> Result<(), AppError> {
        let mut insert_table = conn.prepare(
            "INSERT INTO table_metadata (snapshot_id, table_name, table_type, table_owner)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut insert_column = conn.prepare(
            "INSERT INTO column_metadata
             (table_id, column_name, data_type, is_nullable, column_default, ordinal_position, character_maximum_length)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;

        for table in &snapshot.tables {
            insert_table.execute(params![
                snapshot_id,
                table.table_name,
                table.table_type,
                table.table_owner
            ])?;
            let table_id = conn.last_insert_rowid();

            for column in &table.columns {
                insert_column.execute(params![
                    table_id,
                    column.column_name,
                    column.data_type,
                    column.is_nullable,
                    column.column_default,
                    column.ordinal_position,
                    column.character_maximum_length
                ])?;
            }
        }
        Ok(())
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn put(&self, snapshot: &Snapshot) -> Result<i64, AppError> {
        let document = snapshot.to_json()?;
        let checksum = snapshot.checksum();

        let id = self.transaction(|conn| {
            conn.execute(
                "INSERT INTO schema_snapshots (timestamp, schema_name, checksum, snapshot_data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    timestamp_key(&snapshot.crawl_timestamp),
                    snapshot.schema_name,
                    checksum,
                    document
                ],
            )?;
            let id = conn.last_insert_rowid();
            Self::write_index(conn, id, snapshot)?;
            Ok(id)
        })?;

        info!(
            "Saved snapshot {} for schema {}: {} tables, {} columns",
            id,
            snapshot.schema_name,
            snapshot.tables.len(),
            snapshot.column_count()
        );
        Ok(id)
    }

    fn get(&self, id: i64) -> Result<Snapshot, AppError> {
        let conn = self.lock()?;
        let document: Option<String> = conn
            .query_row(
                "SELECT snapshot_data FROM schema_snapshots WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match document {
            Some(document) => Self::decode(id, &document),
            None => Err(AppError::SnapshotNotFound(id)),
        }
    }

    fn latest(&self, count: usize) -> Result<Vec<StoredSnapshot>, AppError> {
        let conn = self.lock()?;
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT id, snapshot_data FROM schema_snapshots
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut snapshots = Vec::new();
        for row in rows {
            let (id, document) = row?;
            snapshots.push(StoredSnapshot {
                id,
                snapshot: Self::decode(id, &document)?,
            });
        }
        Ok(snapshots)
    }

    fn list(&self) -> Result<Vec<SnapshotMetadata>, AppError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.timestamp, s.schema_name, s.checksum,
                    (SELECT COUNT(*) FROM table_metadata t WHERE t.snapshot_id = s.id) AS table_count,
                    (SELECT COUNT(*) FROM column_metadata c
                       JOIN table_metadata t ON c.table_id = t.id
                      WHERE t.snapshot_id = s.id) AS column_count
             FROM schema_snapshots s
             ORDER BY s.timestamp DESC, s.id DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut listed = Vec::new();
        for row in rows {
            let (id, timestamp, schema_name, checksum, tables, columns) = row?;
            let crawl_timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| AppError::malformed(id, format!("invalid timestamp: {}", e)))?
                .with_timezone(&Utc);

            listed.push(SnapshotMetadata {
                id,
                schema_name,
                crawl_timestamp,
                table_count: usize::try_from(tables).unwrap_or_default(),
                column_count: usize::try_from(columns).unwrap_or_default(),
                checksum,
            });
        }
        Ok(listed)
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AppError> {
        let cutoff_key = timestamp_key(&cutoff);

        let removed = self.transaction(|conn| {
            conn.execute(
                "DELETE FROM column_metadata WHERE table_id IN (
                    SELECT t.id FROM table_metadata t
                    JOIN schema_snapshots s ON t.snapshot_id = s.id
                    WHERE s.timestamp < ?1)",
                params![cutoff_key],
            )?;
            conn.execute(
                "DELETE FROM table_metadata WHERE snapshot_id IN (
                    SELECT id FROM schema_snapshots WHERE timestamp < ?1)",
                params![cutoff_key],
            )?;
            let removed = conn.execute(
                "DELETE FROM schema_snapshots WHERE timestamp < ?1",
                params![cutoff_key],
            )?;
            Ok(removed)
        })?;

        debug!("Pruned {} snapshots crawled before {}", removed, cutoff_key);
        Ok(removed)
    }
}
