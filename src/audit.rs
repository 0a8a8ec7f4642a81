//! DDL Audit Correlation
//!
//! Best-effort attribution of schema changes to the database users who made
//! them. Events come from a DDL audit table filled by an event trigger; a
//! change is matched against the events in the window between two snapshots
//! by the name of the table it belongs to.

use crate::error::AppError;
use crate::snapshot::diff::Change;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

const UNKNOWN: &str = "Unknown";
const NO_COMMAND: &str = "No command";
const COMMAND_PREVIEW_CHARS: usize = 100;

/// One row of the DDL audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_time: DateTime<Utc>,
    pub user_name: String,
    pub action: String,
    pub object_type: String,
    pub object_name: String,
    pub command: String,
}

impl AuditEvent {
    /// Build an event from nullable audit columns
    pub fn from_columns(
        event_time: DateTime<Utc>,
        user_name: Option<String>,
        action: Option<String>,
        object_type: Option<String>,
        object_name: Option<String>,
        command: Option<String>,
    ) -> Self {
        let or_unknown = |v: Option<String>| v.unwrap_or_else(|| UNKNOWN.to_string());
        Self {
            event_time,
            user_name: or_unknown(user_name),
            action: or_unknown(action),
            object_type: or_unknown(object_type),
            object_name: or_unknown(object_name),
            command: command
                .filter(|c| !c.is_empty())
                .map(|c| preview(&c))
                .unwrap_or_else(|| NO_COMMAND.to_string()),
        }
    }
}

fn preview(command: &str) -> String {
    if command.chars().count() > COMMAND_PREVIEW_CHARS {
        let head: String = command.chars().take(COMMAND_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        command.to_string()
    }
}

/// Half-open time window `(start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AuditWindow {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at > self.start && at <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Who most likely made a change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Attribution {
    Attributed(AuditEvent),
    Unavailable,
}

impl Attribution {
    pub fn event(&self) -> Option<&AuditEvent> {
        match self {
            Attribution::Attributed(event) => Some(event),
            Attribution::Unavailable => None,
        }
    }
}

/// A change paired with its attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedChange {
    #[serde(flatten)]
    pub change: Change,
    pub attribution: Attribution,
}

/// Joins changes to audit events by table name inside a time window
#[derive(Debug, Clone)]
pub struct AuditCorrelator {
    schema: String,
    events: Vec<AuditEvent>,
}

impl AuditCorrelator {
    /// Keeps only the events inside `window`, in the order given.
    pub fn new(schema: impl Into<String>, events: Vec<AuditEvent>, window: AuditWindow) -> Self {
        let events: Vec<AuditEvent> = events
            .into_iter()
            .filter(|e| window.contains(e.event_time))
            .collect();

        Self {
            schema: schema.into(),
            events,
        }
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    /// First event touching the change's table, bare or schema-qualified
    pub fn attribute(&self, change: &Change) -> Attribution {
        let target = change.table_name();
        let qualified = format!("{}.{}", self.schema, target);

        self.events
            .iter()
            .find(|e| e.object_name == target || e.object_name == qualified)
            .cloned()
            .map(Attribution::Attributed)
            .unwrap_or(Attribution::Unavailable)
    }

    pub fn annotate(&self, changes: &[Change]) -> Vec<AttributedChange> {
        changes
            .iter()
            .map(|change| AttributedChange {
                change: change.clone(),
                attribution: self.attribute(change),
            })
            .collect()
    }

    /// Event count per user, busiest first
    pub fn user_summary(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for event in &self.events {
            *counts.entry(event.user_name.as_str()).or_default() += 1;
        }

        let mut summary: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(user, count)| (user.to_string(), count))
            .collect();
        summary.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        summary
    }
}

/// Reads DDL audit events from the crawled database
pub struct PostgresAuditSource;

impl PostgresAuditSource {
    /// Fetch events in `window`, oldest first
    pub async fn fetch(
        pool: &Pool,
        table: &str,
        window: AuditWindow,
    ) -> Result<Vec<AuditEvent>, AppError> {
        if !is_identifier(table)? {
            return Err(AppError::Config(format!("Invalid audit table name '{}'", table)));
        }
        if window.is_empty() {
            return Ok(vec![]);
        }

        let client = pool.get().await?;

        let query = format!(
            r#"
            SELECT
                event_time::timestamptz AS event_time,
                user_name::text AS user_name,
                action::text AS action,
                object_type::text AS object_type,
                object_name::text AS object_name,
                command::text AS command
            FROM {}
            WHERE event_time::timestamptz > $1::timestamptz
              AND event_time::timestamptz <= $2::timestamptz
            ORDER BY event_time
        "#,
            table
        );

        let rows = client
            .query(query.as_str(), &[&window.start, &window.end])
            .await?;

        let events: Vec<AuditEvent> = rows
            .iter()
            .map(|row| {
                AuditEvent::from_columns(
                    row.get("event_time"),
                    row.get("user_name"),
                    row.get("action"),
                    row.get("object_type"),
                    row.get("object_name"),
                    row.get("command"),
                )
            })
            .collect();

        info!(
            "Fetched {} audit events from {} between {} and {}",
            events.len(),
            table,
            window.start,
            window.end
        );
        Ok(events)
    }
}

/// `name` or `schema.name`, plain unquoted identifiers only
fn is_identifier(table: &str) -> Result<bool, AppError> {
    let pattern = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let valid = pattern.is_match(table);
    if !valid {
        debug!("Rejected audit table identifier {:?}", table);
    }
    Ok(valid)
}
