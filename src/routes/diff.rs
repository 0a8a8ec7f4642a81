//! Diff API Routes
//!
//! Structural diffs between stored snapshots, as JSON or a Markdown report.

use crate::audit::{AttributedChange, AuditWindow};
use crate::error::AppError;
use crate::service::DiffOutcome;
use crate::snapshot::SchemaDiff;
use crate::state::SharedState;
use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

// ==================== Request/Response Types ====================

#[derive(Debug, Deserialize, Validate)]
pub struct DiffQuery {
    #[validate(range(min = 1, message = "from must be a snapshot id"))]
    pub from: i64,
    #[validate(range(min = 1, message = "to must be a snapshot id"))]
    pub to: i64,
    #[serde(default)]
    pub attribute: bool,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    #[serde(default)]
    pub attribute: bool,
}

/// Either an explicit pair or, with both ids absent, the latest two
#[derive(Debug, Deserialize, Validate)]
pub struct ReportQuery {
    #[validate(range(min = 1, message = "from must be a snapshot id"))]
    pub from: Option<i64>,
    #[validate(range(min = 1, message = "to must be a snapshot id"))]
    pub to: Option<i64>,
    #[serde(default)]
    pub attribute: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResponse {
    pub success: bool,
    pub diff: SchemaDiff,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributions: Option<Vec<AttributedChange>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_window: Option<AuditWindow>,
}

impl From<DiffOutcome> for DiffResponse {
    fn from(outcome: DiffOutcome) -> Self {
        let attributions = outcome.attributions();
        let audit_window = attributions.as_ref().map(|_| outcome.window);
        Self {
            success: true,
            diff: outcome.diff,
            attributions,
            audit_window,
        }
    }
}

// ==================== Handlers ====================

/// Compare two snapshots by id
pub async fn compare_snapshots(
    State(state): State<SharedState>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<DiffResponse>, AppError> {
    query.validate()?;
    let outcome = state
        .snapshots
        .diff(query.from, query.to, query.attribute)
        .await?;
    Ok(Json(outcome.into()))
}

/// Compare the two most recent snapshots
pub async fn compare_latest(
    State(state): State<SharedState>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<DiffResponse>, AppError> {
    let outcome = state.snapshots.diff_latest(query.attribute).await?;
    Ok(Json(outcome.into()))
}

/// Markdown change report
pub async fn diff_report(
    State(state): State<SharedState>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, AppError> {
    query.validate()?;

    let outcome = match (query.from, query.to) {
        (Some(from), Some(to)) => state.snapshots.diff(from, to, query.attribute).await?,
        (None, None) => state.snapshots.diff_latest(query.attribute).await?,
        _ => {
            return Err(AppError::BadRequest(
                "Both from and to are required, or neither".to_string(),
            ))
        }
    };

    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        outcome.report(),
    ))
}
