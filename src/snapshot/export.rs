//! Snapshot export as JSON, CSV or a Markdown schema report.

use crate::error::AppError;
use crate::snapshot::model::Snapshot;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    Markdown,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Markdown => "md",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
        }
    }
}

pub fn export(snapshot: &Snapshot, format: ExportFormat) -> Result<String, AppError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(snapshot)?),
        ExportFormat::Csv => to_csv(snapshot),
        ExportFormat::Markdown => Ok(to_markdown(snapshot)),
    }
}

const CSV_HEADER: [&str; 8] = [
    "table_name",
    "table_type",
    "table_owner",
    "column_name",
    "data_type",
    "is_nullable",
    "column_default",
    "ordinal_position",
];

/// One row per column, in snapshot order
fn to_csv(snapshot: &Snapshot) -> Result<String, AppError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(CSV_HEADER)?;
    for table in &snapshot.tables {
        for col in &table.columns {
            let position = col.ordinal_position.to_string();
            writer.write_record([
                table.table_name.as_str(),
                table.table_type.as_str(),
                table.table_owner.as_str(),
                col.column_name.as_str(),
                col.data_type.as_str(),
                if col.is_nullable { "YES" } else { "NO" },
                col.column_default.as_deref().unwrap_or(""),
                position.as_str(),
            ])?;
        }
    }

    writer.flush().map_err(csv::Error::from)?;
    let bytes = writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(e.to_string()))
}

fn cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

fn to_markdown(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Schema Report - {}\n", snapshot.schema_name);
    let _ = writeln!(out, "**Generated:** {}\n", snapshot.crawl_timestamp.to_rfc3339());
    let _ = writeln!(out, "**Total Tables:** {}\n", snapshot.tables.len());

    for table in &snapshot.tables {
        let _ = writeln!(out, "## Table: {}\n", table.table_name);
        let _ = writeln!(out, "- **Type:** {}", table.table_type);
        let _ = writeln!(out, "- **Owner:** {}", table.table_owner);
        let _ = writeln!(out, "- **Columns:** {}\n", table.columns.len());

        if !table.columns.is_empty() {
            out.push_str("| Column | Type | Nullable | Default | Position |\n");
            out.push_str("|--------|------|----------|---------|----------|\n");
            for col in &table.columns {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} |",
                    cell(&col.column_name),
                    cell(&col.data_type),
                    if col.is_nullable { "YES" } else { "NO" },
                    cell(col.column_default.as_deref().unwrap_or("NULL")),
                    col.ordinal_position
                );
            }
            out.push('\n');
        }
    }

    out
}
