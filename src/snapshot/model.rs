//! Schema Snapshot Model
//!
//! Canonical nested representation of a crawled schema. A snapshot is built
//! once by the data source, persisted once and then only ever read.
//! Field names match the persisted JSON document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// Point-in-time capture of one schema's tables, columns and constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_name: String,
    pub crawl_timestamp: DateTime<Utc>,
    pub tables: Vec<TableDef>,
}

/// Table definition, unique by `table_name` within a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub table_name: String,
    pub table_type: String,
    pub table_owner: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDef>,
}

/// Column definition, unique by `column_name` within a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub column_name: String,
    pub data_type: String,
    #[serde(deserialize_with = "nullable_flag")]
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub ordinal_position: i32,
    pub character_maximum_length: Option<i32>,
}

/// One (constraint, column) pair as reported by `key_column_usage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDef {
    pub constraint_name: String,
    pub constraint_type: String,
    pub column_name: String,
}

impl Snapshot {
    pub fn new(schema_name: impl Into<String>, tables: Vec<TableDef>) -> Self {
        Self {
            schema_name: schema_name.into(),
            crawl_timestamp: Utc::now(),
            tables,
        }
    }

    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }

    /// Content checksum over the table tree; the crawl timestamp is excluded
    /// so two crawls of an unchanged schema hash the same.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.schema_name.as_bytes());

        for table in &self.tables {
            hasher.update(
                format!("T:{}:{}:{}", table.table_name, table.table_type, table.table_owner)
                    .as_bytes(),
            );
            for col in &table.columns {
                hasher.update(
                    format!(
                        "C:{}:{}:{}:{:?}:{}:{:?}",
                        col.column_name,
                        col.data_type,
                        col.is_nullable,
                        col.column_default,
                        col.ordinal_position,
                        col.character_maximum_length
                    )
                    .as_bytes(),
                );
            }
            for con in &table.constraints {
                hasher.update(
                    format!("K:{}:{}:{}", con.constraint_name, con.constraint_type, con.column_name)
                        .as_bytes(),
                );
            }
        }

        format!("{:x}", hasher.finalize())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(document: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(document)
    }
}

/// Accepts both a boolean and the catalog's `'YES'`/`'NO'` spelling, so
/// documents written straight from `information_schema` rows still load.
fn nullable_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => match s.to_ascii_uppercase().as_str() {
            "YES" | "TRUE" => Ok(true),
            "NO" | "FALSE" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid is_nullable value '{}'",
                other
            ))),
        },
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_json_round_trip_preserves_every_field() {
        let mut orders = table("orders", vec![column("total", "numeric", 1)]);
        orders.table_type = "VIEW".to_string();
        orders.table_owner = "reporting".to_string();
        let original = snapshot(vec![users_table(), orders]);

        let document = original.to_json().unwrap();
        let restored = Snapshot::from_json(&document).unwrap();

        assert_eq!(restored, original);
    }

    #[test]
    fn test_catalog_style_nullable_is_accepted() {
        let document = r#"{
            "schema_name": "public",
            "crawl_timestamp": "2024-03-01T02:00:00Z",
            "tables": [{
                "table_name": "users",
                "table_type": "BASE TABLE",
                "table_owner": "postgres",
                "columns": [{
                    "column_name": "email",
                    "data_type": "text",
                    "is_nullable": "YES",
                    "column_default": null,
                    "ordinal_position": 3,
                    "character_maximum_length": null
                }],
                "constraints": []
            }]
        }"#;

        let snapshot = Snapshot::from_json(document).unwrap();
        assert!(snapshot.tables[0].columns[0].is_nullable);
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let document = r#"{"schema_name": "public", "crawl_timestamp": "2024-03-01T02:00:00Z"}"#;
        let err = Snapshot::from_json(document).unwrap_err();
        assert!(err.to_string().contains("tables"));
    }

    #[test]
    fn test_checksum_ignores_crawl_time() {
        let first = snapshot(vec![users_table()]);
        let mut second = first.clone();
        second.crawl_timestamp = Utc::now();
        assert_eq!(first.checksum(), second.checksum());

        second.tables[0].columns[1].character_maximum_length = Some(100);
        assert_ne!(first.checksum(), second.checksum());
    }

    #[test]
    fn test_column_count_spans_tables() {
        let orders = table("orders", vec![column("id", "integer", 1)]);
        let snapshot = snapshot(vec![users_table(), orders, table("empty", vec![])]);
        assert_eq!(snapshot.column_count(), 3);
    }
}
