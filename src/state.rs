//! Application state management
//!
//! Everything a handler needs is reached through [`AppState`]. There is no
//! process-wide selection state: snapshot ids travel with each request.

use crate::config::Settings;
use crate::service::SnapshotService;
use crate::snapshot::SnapshotStore;
use deadpool_postgres::Pool;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Settings,

    /// Snapshot crawl, diff and retention operations
    pub snapshots: SnapshotService,
}

impl AppState {
    /// `source` is the crawled database; `None` runs against the store only
    pub fn new(settings: Settings, store: Arc<dyn SnapshotStore>, source: Option<Pool>) -> Self {
        let snapshots = SnapshotService::new(
            store,
            source,
            settings.crawler.clone(),
            settings.audit.clone(),
        );

        Self {
            settings,
            snapshots,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
