//! Schema Snapshot Module
//!
//! Point-in-time captures of a schema and everything done with them:
//! - the snapshot model and its JSON document
//! - snapshot stores (SQLite and in-memory)
//! - the diff engine comparing two snapshots
//! - Markdown change reports and snapshot exports

pub mod diff;
pub mod export;
pub mod model;
pub mod report;
pub mod sqlite;
pub mod store;

pub use diff::{Change, DiffEngine, SchemaDiff};
pub use export::ExportFormat;
pub use model::Snapshot;
pub use report::ReportGenerator;
pub use sqlite::SqliteSnapshotStore;
pub use store::{MemorySnapshotStore, SnapshotMetadata, SnapshotStore};
