// Snapshot service shared by the CLI and the HTTP API
//
// Wires the data source, the snapshot store, the diff engine and the audit
// correlator together. Store calls run on the blocking pool.

use crate::audit::{AttributedChange, AuditCorrelator, AuditWindow, PostgresAuditSource};
use crate::config::{AuditConfig, CrawlerConfig, MAX_RETENTION_DAYS};
use crate::error::AppError;
use crate::introspection::PostgresIntrospector;
use crate::snapshot::export::{self, ExportFormat};
use crate::snapshot::{
    DiffEngine, ReportGenerator, SchemaDiff, Snapshot, SnapshotMetadata, SnapshotStore,
};
use chrono::{TimeDelta, Utc};
use deadpool_postgres::Pool;
use std::sync::Arc;
use tracing::{info, warn};

// A diff plus the audit context needed to attribute it
#[derive(Debug)]
pub struct DiffOutcome {
    pub diff: SchemaDiff,
    pub window: AuditWindow,
    pub correlator: Option<AuditCorrelator>,
}

impl DiffOutcome {
    pub fn attributions(&self) -> Option<Vec<AttributedChange>> {
        self.correlator
            .as_ref()
            .map(|c| c.annotate(&self.diff.changes))
    }

    pub fn report(&self) -> String {
        ReportGenerator::diff_report(
            &self.diff.changes,
            self.diff.from_snapshot,
            self.diff.to_snapshot,
            Utc::now(),
            self.correlator.as_ref(),
        )
    }
}

pub struct SnapshotService {
    store: Arc<dyn SnapshotStore>,
    source: Option<Pool>,
    crawler: CrawlerConfig,
    audit: AuditConfig,
}

impl SnapshotService {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        source: Option<Pool>,
        crawler: CrawlerConfig,
        audit: AuditConfig,
    ) -> Self {
        Self {
            store,
            source,
            crawler,
            audit,
        }
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    fn source(&self) -> Result<&Pool, AppError> {
        self.source.as_ref().ok_or_else(|| {
            AppError::DataSourceUnavailable("No database configured for crawling".to_string())
        })
    }

    // Run a store operation off the async executor
    async fn with_store<T, F>(&self, op: F) -> Result<T, AppError>
    where
        F: FnOnce(&dyn SnapshotStore) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| AppError::Internal(format!("Snapshot store task failed: {}", e)))?
    }

    // Crawl the configured schema and persist the snapshot
    pub async fn crawl(&self) -> Result<SnapshotMetadata, AppError> {
        let snapshot = PostgresIntrospector::crawl(
            self.source()?,
            &self.crawler.schema,
            &self.crawler.table_filter,
        )
        .await?;

        self.with_store(move |store| {
            let id = store.put(&snapshot)?;
            Ok(SnapshotMetadata::describe(id, &snapshot))
        })
        .await
    }

    pub async fn list(&self) -> Result<Vec<SnapshotMetadata>, AppError> {
        self.with_store(|store| store.list()).await
    }

    pub async fn get(&self, id: i64) -> Result<Snapshot, AppError> {
        self.with_store(move |store| store.get(id)).await
    }

    pub async fn export(&self, id: i64, format: ExportFormat) -> Result<String, AppError> {
        let snapshot = self.get(id).await?;
        export::export(&snapshot, format)
    }

    // Compare two stored snapshots, optionally with audit attribution
    pub async fn diff(&self, from: i64, to: i64, attribute: bool) -> Result<DiffOutcome, AppError> {
        let diff = self
            .with_store(move |store| DiffEngine::compare_stored(store, from, to))
            .await?;

        info!(
            "Compared snapshots {} -> {}: {} changes",
            from, to, diff.summary.total_changes
        );
        self.outcome(diff, attribute).await
    }

    // Compare the two newest snapshots
    pub async fn diff_latest(&self, attribute: bool) -> Result<DiffOutcome, AppError> {
        let diff = self
            .with_store(|store| {
                let (older, newer) = DiffEngine::latest_pair(store)?;
                Ok(DiffEngine::diff(
                    Some(older.id),
                    &older.snapshot,
                    Some(newer.id),
                    &newer.snapshot,
                ))
            })
            .await?;

        info!(
            "Compared latest snapshots {:?} -> {:?}: {} changes",
            diff.from_snapshot, diff.to_snapshot, diff.summary.total_changes
        );
        self.outcome(diff, attribute).await
    }

    async fn outcome(&self, diff: SchemaDiff, attribute: bool) -> Result<DiffOutcome, AppError> {
        let window = AuditWindow::between(diff.from_timestamp, diff.to_timestamp);
        let correlator = if attribute {
            Some(self.correlator(window).await)
        } else {
            None
        };

        Ok(DiffOutcome {
            diff,
            window,
            correlator,
        })
    }

    // Missing or failing audit sources leave every change unattributed
    async fn correlator(&self, window: AuditWindow) -> AuditCorrelator {
        let events = match (&self.source, self.audit.enabled) {
            (Some(pool), true) => {
                match PostgresAuditSource::fetch(pool, &self.audit.table, window).await {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("Audit events unavailable, continuing without attribution: {}", e);
                        vec![]
                    }
                }
            }
            _ => vec![],
        };

        AuditCorrelator::new(self.crawler.schema.clone(), events, window)
    }

    // Delete snapshots older than `days`
    pub async fn prune(&self, days: i64) -> Result<usize, AppError> {
        let out_of_range = || {
            AppError::BadRequest(format!(
                "Retention must be between 0 and {} days, got {}",
                MAX_RETENTION_DAYS, days
            ))
        };
        if !(0..=MAX_RETENTION_DAYS).contains(&days) {
            return Err(out_of_range());
        }
        let cutoff = TimeDelta::try_days(days)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(out_of_range)?;
        let removed = self.with_store(move |store| store.prune_before(cutoff)).await?;
        info!("Cleaned up {} snapshots older than {} days", removed, days);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::Attribution;
    use crate::snapshot::model::fixtures::*;
    use crate::snapshot::MemorySnapshotStore;
    use pretty_assertions::assert_eq;

    fn service(store: Arc<dyn SnapshotStore>) -> SnapshotService {
        SnapshotService::new(store, None, CrawlerConfig::default(), AuditConfig::default())
    }

    fn seeded() -> (Arc<dyn SnapshotStore>, i64, i64) {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
        let old = snapshot(vec![users_table()]);
        let mut new = snapshot(vec![users_table()]);
        new.crawl_timestamp = old.crawl_timestamp + TimeDelta::hours(1);
        new.tables[0].columns.push(varchar("email", 100, 3));

        let a = store.put(&old).unwrap();
        let b = store.put(&new).unwrap();
        (store, a, b)
    }

    #[tokio::test]
    async fn test_crawl_without_source_is_unavailable() {
        let (store, _, _) = seeded();
        let err = service(store).crawl().await.unwrap_err();
        assert!(matches!(err, AppError::DataSourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_diff_with_attribution_degrades_gracefully() {
        let (store, a, b) = seeded();
        let outcome = service(store).diff(a, b, true).await.unwrap();

        assert_eq!(outcome.diff.summary.columns_added, 1);
        let attributions = outcome.attributions().unwrap();
        assert_eq!(attributions.len(), 1);
        assert_eq!(attributions[0].attribution, Attribution::Unavailable);
        assert!(outcome
            .report()
            .contains("## Users\n\nNo DDL activity recorded in this window.\n"));
    }

    #[tokio::test]
    async fn test_diff_latest_matches_explicit_ids() {
        let (store, a, b) = seeded();
        let service = service(store);

        let latest = service.diff_latest(false).await.unwrap();
        let explicit = service.diff(a, b, false).await.unwrap();

        assert_eq!(latest.diff.changes, explicit.diff.changes);
        assert_eq!(latest.diff.from_snapshot, Some(a));
        assert!(latest.attributions().is_none());
    }

    #[tokio::test]
    async fn test_missing_snapshot_aborts_diff() {
        let (store, a, _) = seeded();
        let err = service(store).diff(a, 42, false).await.unwrap_err();
        assert!(matches!(err, AppError::SnapshotNotFound(42)));
    }

    #[tokio::test]
    async fn test_prune_keeps_recent() {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
        let mut recent = snapshot(vec![users_table()]);
        recent.crawl_timestamp = Utc::now();
        store.put(&snapshot(vec![users_table()])).unwrap();
        store.put(&recent).unwrap();

        let removed = service(Arc::clone(&store)).prune(30).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prune_rejects_out_of_range_retention() {
        let (store, _, _) = seeded();
        let service = service(Arc::clone(&store));

        for days in [i64::from(u32::MAX), i64::MAX, -1] {
            let err = service.prune(days).await.unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "days = {}", days);
        }
        assert_eq!(store.list().unwrap().len(), 2);
    }
}
