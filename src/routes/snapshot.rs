//! Snapshot API Routes
//!
//! Crawling, listing, fetching, exporting and pruning snapshots.

use crate::error::AppError;
use crate::snapshot::{ExportFormat, Snapshot, SnapshotMetadata};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

// ==================== Request/Response Types ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCreatedResponse {
    pub success: bool,
    pub message: String,
    pub snapshot: SnapshotMetadata,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotListResponse {
    pub success: bool,
    pub snapshots: Vec<SnapshotMetadata>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub success: bool,
    pub id: i64,
    pub snapshot: Snapshot,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: ExportFormat,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct PruneRequest {
    /// Retention in days, the configured default when absent
    #[validate(range(min = 0, max = 36500, message = "days must be between 0 and 36500"))]
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneResponse {
    pub success: bool,
    pub removed: usize,
    pub retention_days: i64,
}

// ==================== Handlers ====================

/// Crawl the configured schema and store the result
pub async fn create_snapshot(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<SnapshotCreatedResponse>), AppError> {
    let snapshot = state.snapshots.crawl().await?;

    Ok((
        StatusCode::CREATED,
        Json(SnapshotCreatedResponse {
            success: true,
            message: format!(
                "Snapshot {} created with {} tables",
                snapshot.id, snapshot.table_count
            ),
            snapshot,
        }),
    ))
}

pub async fn list_snapshots(
    State(state): State<SharedState>,
) -> Result<Json<SnapshotListResponse>, AppError> {
    let snapshots = state.snapshots.list().await?;
    Ok(Json(SnapshotListResponse {
        success: true,
        snapshots,
    }))
}

pub async fn get_snapshot(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<SnapshotResponse>, AppError> {
    let snapshot = state.snapshots.get(id).await?;
    Ok(Json(SnapshotResponse {
        success: true,
        id,
        snapshot,
    }))
}

/// Export a snapshot as JSON, CSV or Markdown
pub async fn export_snapshot(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let document = state.snapshots.export(id, query.format).await?;
    let disposition = format!(
        "attachment; filename=\"schema_snapshot_{}.{}\"",
        id,
        query.format.extension()
    );

    Ok((
        [
            (header::CONTENT_TYPE, query.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        document,
    ))
}

/// Delete snapshots older than the retention period
pub async fn prune_snapshots(
    State(state): State<SharedState>,
    Json(req): Json<PruneRequest>,
) -> Result<Json<PruneResponse>, AppError> {
    req.validate()?;

    let days = req.days.unwrap_or(state.settings.store.retention_days);
    let removed = state.snapshots.prune(days).await?;

    Ok(Json(PruneResponse {
        success: true,
        removed,
        retention_days: days,
    }))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::*;
    use axum::http::{header, StatusCode};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_list_snapshots_newest_first() {
        let (router, _) = seeded_router();
        let (response, body) = send(router, get("/api/snapshots")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        let ids: Vec<i64> = json["snapshots"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(json["snapshots"][0]["columnCount"], 3);
    }

    #[tokio::test]
    async fn test_get_unknown_snapshot_is_404() {
        let (router, _) = seeded_router();
        let (response, body) = send(router, get("/api/snapshots/9")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["code"], "SNAPSHOT_NOT_FOUND");
        assert_eq!(json["message"], "Snapshot 9 not found");
    }

    #[tokio::test]
    async fn test_get_snapshot_document() {
        let (router, _) = seeded_router();
        let (response, body) = send(router, get("/api/snapshots/1")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["snapshot"]["schema_name"], "public");
        assert_eq!(json["snapshot"]["tables"][0]["table_name"], "users");
    }

    #[tokio::test]
    async fn test_export_csv() {
        let (router, _) = seeded_router();
        let (response, body) = send(router, get("/api/snapshots/2/export?format=csv")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        assert_eq!(body.lines().count(), 4);
    }

    #[tokio::test]
    async fn test_crawl_without_database_is_503() {
        let (router, _) = seeded_router();
        let (response, body) = send(router, post_json("/api/snapshots", "")).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("DATA_SOURCE_UNAVAILABLE"));
    }

    #[tokio::test]
    async fn test_prune_validates_days() {
        let (router, store) = seeded_router();
        let (response, _) = send(router.clone(), post_json("/api/snapshots/prune", r#"{"days": -5}"#)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (response, body) = send(router, post_json("/api/snapshots/prune", r#"{"days": 30}"#)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["removed"], 2);
        assert!(store.list().unwrap().is_empty());
    }
}
