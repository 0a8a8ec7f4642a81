//! Schema Introspection Module
//!
//! Crawls one schema of a live PostgreSQL database into a [`Snapshot`].
//! Catalog rows are converted to typed table and column definitions here, so
//! nothing downstream ever sees a loosely-typed row.

use crate::error::AppError;
use crate::snapshot::model::{ColumnDef, ConstraintDef, Snapshot, TableDef};
use deadpool_postgres::{Client, Pool};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Which tables a crawl keeps.
///
/// Rules apply in order: include list, exclude list, include patterns,
/// exclude patterns. Empty rules are skipped. Patterns are shell wildcards
/// (`*`, `?`, `[...]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableFilter {
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub case_sensitive: bool,
}

impl TableFilter {
    pub fn is_empty(&self) -> bool {
        self.include_tables.is_empty()
            && self.exclude_tables.is_empty()
            && self.include_patterns.is_empty()
            && self.exclude_patterns.is_empty()
    }

    /// Compile the wildcard patterns once for a crawl
    pub fn matcher(&self) -> Result<TableMatcher, AppError> {
        let fold = |name: &String| {
            if self.case_sensitive {
                name.clone()
            } else {
                name.to_lowercase()
            }
        };
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>, AppError> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|e| {
                        AppError::Config(format!("Invalid table pattern '{}': {}", p, e))
                    })
                })
                .collect()
        };

        Ok(TableMatcher {
            options: MatchOptions {
                case_sensitive: self.case_sensitive,
                ..MatchOptions::new()
            },
            include_tables: self.include_tables.iter().map(fold).collect(),
            exclude_tables: self.exclude_tables.iter().map(fold).collect(),
            include_patterns: compile(&self.include_patterns)?,
            exclude_patterns: compile(&self.exclude_patterns)?,
        })
    }
}

/// A [`TableFilter`] with its patterns compiled
#[derive(Debug)]
pub struct TableMatcher {
    options: MatchOptions,
    include_tables: Vec<String>,
    exclude_tables: Vec<String>,
    include_patterns: Vec<Pattern>,
    exclude_patterns: Vec<Pattern>,
}

impl TableMatcher {
    pub fn allows(&self, table_name: &str) -> bool {
        let name = if self.options.case_sensitive {
            table_name.to_string()
        } else {
            table_name.to_lowercase()
        };
        let matches = |p: &Pattern| p.matches_with(table_name, self.options);

        if !self.include_tables.is_empty() && !self.include_tables.contains(&name) {
            return false;
        }
        if self.exclude_tables.contains(&name) {
            return false;
        }
        if !self.include_patterns.is_empty() && !self.include_patterns.iter().any(matches) {
            return false;
        }
        !self.exclude_patterns.iter().any(matches)
    }
}

/// Schema introspector for PostgreSQL
pub struct PostgresIntrospector;

impl PostgresIntrospector {
    /// Crawl `schema` into a snapshot. Any pool or catalog failure is
    /// reported as `DataSourceUnavailable`.
    pub async fn crawl(pool: &Pool, schema: &str, filter: &TableFilter) -> Result<Snapshot, AppError> {
        let matcher = filter.matcher()?;
        info!("Crawling schema: {}", schema);

        let client = pool.get().await?;
        let mut tables = Vec::new();

        for (table_name, table_type, table_owner) in Self::get_tables(&client, schema).await? {
            if !matcher.allows(&table_name) {
                debug!("Skipping table (filtered): {}", table_name);
                continue;
            }

            let columns = Self::get_columns(&client, schema, &table_name).await?;
            let constraints = Self::get_constraints(&client, schema, &table_name).await?;
            debug!(
                "Processed table {}: {} columns, {} constraint columns",
                table_name,
                columns.len(),
                constraints.len()
            );

            tables.push(TableDef {
                table_name,
                table_type,
                table_owner,
                columns,
                constraints,
            });
        }

        let snapshot = Snapshot::new(schema, tables);
        info!(
            "Schema crawl completed. Found {} tables, {} columns",
            snapshot.tables.len(),
            snapshot.column_count()
        );
        Ok(snapshot)
    }

    async fn get_tables(client: &Client, schema: &str) -> Result<Vec<(String, String, String)>, AppError> {
        let query = r#"
            SELECT
                t.table_name::text AS table_name,
                t.table_type::text AS table_type,
                COALESCE(c.relowner::regrole::text, 'unknown') AS table_owner
            FROM information_schema.tables t
            LEFT JOIN pg_namespace n ON n.nspname = t.table_schema
            LEFT JOIN pg_class c ON c.relname = t.table_name AND c.relnamespace = n.oid
            WHERE t.table_schema = $1
            ORDER BY t.table_name
        "#;

        let rows = client.query(query, &[&schema]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get("table_name"),
                    row.get("table_type"),
                    row.get("table_owner"),
                )
            })
            .collect())
    }

    async fn get_columns(client: &Client, schema: &str, table: &str) -> Result<Vec<ColumnDef>, AppError> {
        let query = r#"
            SELECT
                column_name::text AS column_name,
                data_type::text AS data_type,
                is_nullable::text AS is_nullable,
                column_default::text AS column_default,
                ordinal_position::int AS ordinal_position,
                character_maximum_length::int AS character_maximum_length
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let rows = client.query(query, &[&schema, &table]).await?;
        Ok(rows
            .iter()
            .map(|row| ColumnDef {
                column_name: row.get("column_name"),
                data_type: row.get("data_type"),
                is_nullable: row.get::<_, String>("is_nullable") == "YES",
                column_default: row.get("column_default"),
                ordinal_position: row.get("ordinal_position"),
                character_maximum_length: row.get("character_maximum_length"),
            })
            .collect())
    }

    async fn get_constraints(
        client: &Client,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ConstraintDef>, AppError> {
        let query = r#"
            SELECT
                tc.constraint_name::text AS constraint_name,
                tc.constraint_type::text AS constraint_type,
                kcu.column_name::text AS column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
                AND tc.table_name = kcu.table_name
            WHERE tc.table_schema = $1 AND tc.table_name = $2
            ORDER BY tc.constraint_name, kcu.ordinal_position
        "#;

        let rows = client.query(query, &[&schema, &table]).await?;
        Ok(rows
            .iter()
            .map(|row| ConstraintDef {
                constraint_name: row.get("constraint_name"),
                constraint_type: row.get("constraint_type"),
                column_name: row.get("column_name"),
            })
            .collect())
    }
}
