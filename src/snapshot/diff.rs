//! Schema Diff Engine
//!
//! Compares two schema snapshots and produces an ordered list of typed changes.
//! Tables, columns and constraints are joined by name, so a rename shows up as
//! a removal plus an addition.
//!
//! Emission order is anchored to the snapshots' own sequences: added tables
//! (new order), removed tables (old order), then for each table present in
//! both (old order) its property changes, added columns, removed columns,
//! per-column property changes and finally constraint changes.

use crate::error::AppError;
use crate::snapshot::model::{ColumnDef, ConstraintDef, Snapshot, TableDef};
use crate::snapshot::store::{SnapshotStore, StoredSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use tracing::debug;

/// Type of schema change detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Added => "added",
            ChangeType::Removed => "removed",
            ChangeType::Modified => "modified",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of schema objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Table,
    Column,
    Constraint,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Table => "table",
            ObjectType::Column => "column",
            ObjectType::Constraint => "constraint",
        }
    }

    /// Capitalized label used in reports
    pub fn title(&self) -> &'static str {
        match self {
            ObjectType::Table => "Table",
            ObjectType::Column => "Column",
            ObjectType::Constraint => "Constraint",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single detected difference between two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub change_type: ChangeType,
    pub object_type: ObjectType,
    pub object_name: String,
    /// Owning table for column and constraint changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_object: Option<String>,
    #[serde(default)]
    pub old_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
    /// Informational sentence, never parsed back
    pub details: String,
}

impl Change {
    fn presence(
        change_type: ChangeType,
        object_type: ObjectType,
        name: &str,
        parent: Option<&str>,
        details: String,
    ) -> Self {
        Self {
            change_type,
            object_type,
            object_name: name.to_string(),
            parent_object: parent.map(str::to_string),
            old_value: None,
            new_value: None,
            details,
        }
    }

    fn modified(
        object_type: ObjectType,
        name: &str,
        parent: Option<&str>,
        old_value: Option<Value>,
        new_value: Option<Value>,
        details: String,
    ) -> Self {
        Self {
            change_type: ChangeType::Modified,
            object_type,
            object_name: name.to_string(),
            parent_object: parent.map(str::to_string),
            old_value,
            new_value,
            details,
        }
    }

    /// Table this change belongs to (the table itself for table changes)
    pub fn table_name(&self) -> &str {
        self.parent_object.as_deref().unwrap_or(&self.object_name)
    }
}

/// Summary statistics for the diff
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub tables_added: usize,
    pub tables_removed: usize,
    /// Distinct tables present in both snapshots with at least one change
    pub tables_modified: usize,
    pub columns_added: usize,
    pub columns_removed: usize,
    pub columns_modified: usize,
    pub constraints_added: usize,
    pub constraints_removed: usize,
    pub constraints_modified: usize,
    pub total_changes: usize,
}

impl DiffSummary {
    pub fn from_changes(changes: &[Change]) -> Self {
        let mut summary = DiffSummary {
            total_changes: changes.len(),
            ..Default::default()
        };
        let mut modified_tables: BTreeSet<&str> = BTreeSet::new();

        for change in changes {
            match change.change_type {
                ChangeType::Added => summary.added += 1,
                ChangeType::Removed => summary.removed += 1,
                ChangeType::Modified => summary.modified += 1,
            }

            match (change.object_type, change.change_type) {
                (ObjectType::Table, ChangeType::Added) => summary.tables_added += 1,
                (ObjectType::Table, ChangeType::Removed) => summary.tables_removed += 1,
                (ObjectType::Column, ChangeType::Added) => summary.columns_added += 1,
                (ObjectType::Column, ChangeType::Removed) => summary.columns_removed += 1,
                (ObjectType::Column, ChangeType::Modified) => summary.columns_modified += 1,
                (ObjectType::Constraint, ChangeType::Added) => summary.constraints_added += 1,
                (ObjectType::Constraint, ChangeType::Removed) => summary.constraints_removed += 1,
                (ObjectType::Constraint, ChangeType::Modified) => {
                    summary.constraints_modified += 1
                }
                (ObjectType::Table, ChangeType::Modified) => {}
            }

            let whole_table = change.object_type == ObjectType::Table
                && change.change_type != ChangeType::Modified;
            if !whole_table {
                modified_tables.insert(change.table_name());
            }
        }

        summary.tables_modified = modified_tables.len();
        summary
    }
}

/// Complete schema diff result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDiff {
    /// Store id of the older snapshot, when it came from the store
    pub from_snapshot: Option<i64>,
    pub to_snapshot: Option<i64>,
    pub from_timestamp: DateTime<Utc>,
    pub to_timestamp: DateTime<Utc>,
    pub changes: Vec<Change>,
    pub summary: DiffSummary,
}

/// Key-to-item view over a slice: keys keep their first-seen position,
/// values follow last-write-wins for duplicate keys.
struct KeyedIndex<'a, K, T> {
    order: Vec<K>,
    by_key: HashMap<K, &'a T>,
}

impl<'a, K: Eq + Hash + Copy, T> KeyedIndex<'a, K, T> {
    fn build(items: &'a [T], key: impl Fn(&'a T) -> K) -> Self {
        let mut order = Vec::with_capacity(items.len());
        let mut by_key = HashMap::with_capacity(items.len());
        for item in items {
            let k = key(item);
            if by_key.insert(k, item).is_none() {
                order.push(k);
            }
        }
        Self { order, by_key }
    }

    fn contains(&self, key: &K) -> bool {
        self.by_key.contains_key(key)
    }

    fn get(&self, key: &K) -> Option<&'a T> {
        self.by_key.get(key).copied()
    }

    fn iter(&self) -> impl Iterator<Item = (K, &'a T)> + '_ {
        self.order.iter().map(move |k| (*k, self.by_key[k]))
    }
}

/// The diff engine that compares schema snapshots
pub struct DiffEngine;

impl DiffEngine {
    /// Compare two snapshots and return every difference in emission order
    pub fn compare(old: &Snapshot, new: &Snapshot) -> Vec<Change> {
        let mut changes = Vec::new();
        Self::diff_tables(&old.tables, &new.tables, &mut changes);
        changes
    }

    /// Compare and wrap the result with snapshot ids and a summary
    pub fn diff(
        from_id: Option<i64>,
        old: &Snapshot,
        to_id: Option<i64>,
        new: &Snapshot,
    ) -> SchemaDiff {
        let changes = Self::compare(old, new);
        let summary = DiffSummary::from_changes(&changes);

        SchemaDiff {
            from_snapshot: from_id,
            to_snapshot: to_id,
            from_timestamp: old.crawl_timestamp,
            to_timestamp: new.crawl_timestamp,
            changes,
            summary,
        }
    }

    /// Load two snapshots from the store. Both must load before anything is
    /// compared; the first failure is returned as is.
    pub fn load_pair(
        store: &dyn SnapshotStore,
        from_id: i64,
        to_id: i64,
    ) -> Result<(Snapshot, Snapshot), AppError> {
        let old = store.get(from_id)?;
        let new = store.get(to_id)?;
        Ok((old, new))
    }

    /// Compare two stored snapshots by id
    pub fn compare_stored(
        store: &dyn SnapshotStore,
        from_id: i64,
        to_id: i64,
    ) -> Result<SchemaDiff, AppError> {
        let (old, new) = Self::load_pair(store, from_id, to_id)?;
        let diff = Self::diff(Some(from_id), &old, Some(to_id), &new);

        debug!(
            "Compared snapshots {} -> {}: {} changes",
            from_id, to_id, diff.summary.total_changes
        );
        Ok(diff)
    }

    /// The two most recent snapshots as (older, newer)
    pub fn latest_pair(
        store: &dyn SnapshotStore,
    ) -> Result<(StoredSnapshot, StoredSnapshot), AppError> {
        let mut latest = store.latest(2)?;
        if latest.len() < 2 {
            return Err(AppError::BadRequest(
                "Need at least 2 snapshots to compare".to_string(),
            ));
        }
        let newer = latest.remove(0);
        let older = latest.remove(0);
        Ok((older, newer))
    }

    fn diff_tables(old_tables: &[TableDef], new_tables: &[TableDef], changes: &mut Vec<Change>) {
        let old_index = KeyedIndex::build(old_tables, |t| t.table_name.as_str());
        let new_index = KeyedIndex::build(new_tables, |t| t.table_name.as_str());

        for (name, _) in new_index.iter() {
            if !old_index.contains(&name) {
                changes.push(Change::presence(
                    ChangeType::Added,
                    ObjectType::Table,
                    name,
                    None,
                    format!("Table '{}' was added", name),
                ));
            }
        }

        for (name, _) in old_index.iter() {
            if !new_index.contains(&name) {
                changes.push(Change::presence(
                    ChangeType::Removed,
                    ObjectType::Table,
                    name,
                    None,
                    format!("Table '{}' was removed", name),
                ));
            }
        }

        for (name, old_table) in old_index.iter() {
            if let Some(new_table) = new_index.get(&name) {
                Self::diff_table(old_table, new_table, changes);
            }
        }
    }

    fn diff_table(old: &TableDef, new: &TableDef, changes: &mut Vec<Change>) {
        let table = old.table_name.as_str();

        if old.table_type != new.table_type {
            changes.push(Change::modified(
                ObjectType::Table,
                table,
                None,
                Some(Value::from(old.table_type.as_str())),
                Some(Value::from(new.table_type.as_str())),
                format!(
                    "Table type changed from '{}' to '{}'",
                    old.table_type, new.table_type
                ),
            ));
        }

        if old.table_owner != new.table_owner {
            changes.push(Change::modified(
                ObjectType::Table,
                table,
                None,
                Some(Value::from(old.table_owner.as_str())),
                Some(Value::from(new.table_owner.as_str())),
                format!(
                    "Table owner changed from '{}' to '{}'",
                    old.table_owner, new.table_owner
                ),
            ));
        }

        Self::diff_columns(table, &old.columns, &new.columns, changes);
        Self::diff_constraints(table, &old.constraints, &new.constraints, changes);
    }

    fn diff_columns(
        table: &str,
        old_cols: &[ColumnDef],
        new_cols: &[ColumnDef],
        changes: &mut Vec<Change>,
    ) {
        let old_index = KeyedIndex::build(old_cols, |c| c.column_name.as_str());
        let new_index = KeyedIndex::build(new_cols, |c| c.column_name.as_str());

        for (name, _) in new_index.iter() {
            if !old_index.contains(&name) {
                changes.push(Change::presence(
                    ChangeType::Added,
                    ObjectType::Column,
                    name,
                    Some(table),
                    format!("Column '{}' was added to table '{}'", name, table),
                ));
            }
        }

        for (name, _) in old_index.iter() {
            if !new_index.contains(&name) {
                changes.push(Change::presence(
                    ChangeType::Removed,
                    ObjectType::Column,
                    name,
                    Some(table),
                    format!("Column '{}' was removed from table '{}'", name, table),
                ));
            }
        }

        for (name, old_col) in old_index.iter() {
            if let Some(new_col) = new_index.get(&name) {
                Self::compare_columns(table, old_col, new_col, changes);
            }
        }
    }

    /// One change per differing property, never an aggregate
    fn compare_columns(table: &str, from: &ColumnDef, to: &ColumnDef, changes: &mut Vec<Change>) {
        let name = from.column_name.as_str();
        let mut push = |old_value: Option<Value>, new_value: Option<Value>, details: String| {
            changes.push(Change::modified(
                ObjectType::Column,
                name,
                Some(table),
                old_value,
                new_value,
                details,
            ));
        };

        if from.data_type != to.data_type {
            push(
                Some(Value::from(from.data_type.as_str())),
                Some(Value::from(to.data_type.as_str())),
                format!(
                    "Column '{}' data type changed from '{}' to '{}'",
                    name, from.data_type, to.data_type
                ),
            );
        }

        if from.is_nullable != to.is_nullable {
            push(
                Some(Value::from(from.is_nullable)),
                Some(Value::from(to.is_nullable)),
                format!(
                    "Column '{}' nullability changed from '{}' to '{}'",
                    name,
                    yes_no(from.is_nullable),
                    yes_no(to.is_nullable)
                ),
            );
        }

        if from.column_default != to.column_default {
            push(
                from.column_default.as_deref().map(Value::from),
                to.column_default.as_deref().map(Value::from),
                format!(
                    "Column '{}' default value changed from '{}' to '{}'",
                    name,
                    from.column_default.as_deref().unwrap_or("NULL"),
                    to.column_default.as_deref().unwrap_or("NULL")
                ),
            );
        }

        if from.character_maximum_length != to.character_maximum_length {
            push(
                from.character_maximum_length.map(Value::from),
                to.character_maximum_length.map(Value::from),
                format!(
                    "Column '{}' character length changed from {} to {}",
                    name,
                    length_label(from.character_maximum_length),
                    length_label(to.character_maximum_length)
                ),
            );
        }

        if from.ordinal_position != to.ordinal_position {
            push(
                Some(Value::from(from.ordinal_position)),
                Some(Value::from(to.ordinal_position)),
                format!(
                    "Column '{}' position changed from {} to {}",
                    name, from.ordinal_position, to.ordinal_position
                ),
            );
        }
    }

    fn diff_constraints(
        table: &str,
        old_cons: &[ConstraintDef],
        new_cons: &[ConstraintDef],
        changes: &mut Vec<Change>,
    ) {
        let old_index = KeyedIndex::build(old_cons, constraint_key);
        let new_index = KeyedIndex::build(new_cons, constraint_key);

        for (k, con) in new_index.iter() {
            if !old_index.contains(&k) {
                changes.push(Change::presence(
                    ChangeType::Added,
                    ObjectType::Constraint,
                    &con.constraint_name,
                    Some(table),
                    format!(
                        "Constraint '{}' ({}) on column '{}' was added to table '{}'",
                        con.constraint_name, con.constraint_type, con.column_name, table
                    ),
                ));
            }
        }

        for (k, con) in old_index.iter() {
            if !new_index.contains(&k) {
                changes.push(Change::presence(
                    ChangeType::Removed,
                    ObjectType::Constraint,
                    &con.constraint_name,
                    Some(table),
                    format!(
                        "Constraint '{}' ({}) on column '{}' was removed from table '{}'",
                        con.constraint_name, con.constraint_type, con.column_name, table
                    ),
                ));
            }
        }

        for (k, old_con) in old_index.iter() {
            let Some(new_con) = new_index.get(&k) else {
                continue;
            };
            if old_con.constraint_type != new_con.constraint_type {
                changes.push(Change::modified(
                    ObjectType::Constraint,
                    &old_con.constraint_name,
                    Some(table),
                    Some(Value::from(old_con.constraint_type.as_str())),
                    Some(Value::from(new_con.constraint_type.as_str())),
                    format!(
                        "Constraint '{}' on column '{}' type changed from '{}' to '{}'",
                        old_con.constraint_name,
                        old_con.column_name,
                        old_con.constraint_type,
                        new_con.constraint_type
                    ),
                ));
            }
        }
    }
}

/// Multi-column constraints appear once per column
fn constraint_key(con: &ConstraintDef) -> (&str, &str) {
    (con.constraint_name.as_str(), con.column_name.as_str())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

fn length_label(length: Option<i32>) -> String {
    length.map_or_else(|| "none".to_string(), |l| l.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::model::fixtures::*;
    use crate::snapshot::store::MemorySnapshotStore;
    use pretty_assertions::assert_eq;

    fn names(changes: &[Change], change_type: ChangeType, object_type: ObjectType) -> Vec<String> {
        changes
            .iter()
            .filter(|c| c.change_type == change_type && c.object_type == object_type)
            .map(|c| c.object_name.clone())
            .collect()
    }

    #[test]
    fn test_identical_snapshot_yields_no_changes() {
        let snapshot = snapshot(vec![users_table(), table("orders", vec![column("id", "integer", 1)])]);
        assert!(DiffEngine::compare(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn test_added_column_is_reported_with_parent() {
        let old = snapshot(vec![users_table()]);
        let mut new = old.clone();
        new.tables[0].columns.push(varchar("email", 100, 3));

        let changes = DiffEngine::compare(&old, &new);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Added);
        assert_eq!(changes[0].object_type, ObjectType::Column);
        assert_eq!(changes[0].object_name, "email");
        assert_eq!(changes[0].parent_object.as_deref(), Some("users"));
        assert_eq!(changes[0].details, "Column 'email' was added to table 'users'");
    }

    #[test]
    fn test_removed_table() {
        let old = snapshot(vec![table("orders", vec![]), users_table()]);
        let new = snapshot(vec![users_table()]);

        let changes = DiffEngine::compare(&old, &new);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Removed);
        assert_eq!(changes[0].object_type, ObjectType::Table);
        assert_eq!(changes[0].object_name, "orders");
        assert_eq!(changes[0].parent_object, None);
    }

    #[test]
    fn test_length_change_reports_raw_lengths() {
        let old = snapshot(vec![users_table()]);
        let mut new = old.clone();
        new.tables[0].columns[1].character_maximum_length = Some(100);

        let changes = DiffEngine::compare(&old, &new);

        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.change_type, ChangeType::Modified);
        assert_eq!(change.object_type, ObjectType::Column);
        assert_eq!(change.object_name, "name");
        assert_eq!(change.old_value, Some(Value::from(50)));
        assert_eq!(change.new_value, Some(Value::from(100)));
    }

    #[test]
    fn test_each_column_property_changes_in_isolation() {
        let base = snapshot(vec![users_table()]);
        type Mutator = fn(&mut ColumnDef);
        let cases: [(Mutator, Option<Value>, Option<Value>); 5] = [
            (
                (|c: &mut ColumnDef| c.data_type = "text".into()) as Mutator,
                Some(Value::from("character varying")),
                Some(Value::from("text")),
            ),
            (
                (|c: &mut ColumnDef| c.is_nullable = false) as Mutator,
                Some(Value::from(true)),
                Some(Value::from(false)),
            ),
            (
                (|c: &mut ColumnDef| c.column_default = Some("'anon'::character varying".into()))
                    as Mutator,
                None,
                Some(Value::from("'anon'::character varying")),
            ),
            (
                (|c: &mut ColumnDef| c.character_maximum_length = None) as Mutator,
                Some(Value::from(50)),
                None,
            ),
            (
                (|c: &mut ColumnDef| c.ordinal_position = 5) as Mutator,
                Some(Value::from(2)),
                Some(Value::from(5)),
            ),
        ];

        for (mutate, expected_old, expected_new) in cases {
            let mut changed = base.clone();
            mutate(&mut changed.tables[0].columns[1]);

            let changes = DiffEngine::compare(&base, &changed);

            assert_eq!(changes.len(), 1, "{:?}", changes);
            assert_eq!(changes[0].change_type, ChangeType::Modified);
            assert_eq!(changes[0].object_type, ObjectType::Column);
            assert_eq!(changes[0].old_value, expected_old);
            assert_eq!(changes[0].new_value, expected_new);
        }
    }

    #[test]
    fn test_multiple_property_changes_are_not_aggregated() {
        let old = snapshot(vec![users_table()]);
        let mut new = old.clone();
        let col = &mut new.tables[0].columns[1];
        col.data_type = "text".into();
        col.character_maximum_length = None;
        col.is_nullable = false;

        let changes = DiffEngine::compare(&old, &new);
        let details: Vec<&str> = changes.iter().map(|c| c.details.as_str()).collect();

        assert_eq!(
            details,
            vec![
                "Column 'name' data type changed from 'character varying' to 'text'",
                "Column 'name' nullability changed from 'YES' to 'NO'",
                "Column 'name' character length changed from 50 to none",
            ]
        );
    }

    #[test]
    fn test_table_property_changes() {
        let old = snapshot(vec![users_table()]);
        let mut new = old.clone();
        new.tables[0].table_owner = "app_owner".into();
        new.tables[0].table_type = "VIEW".into();

        let changes = DiffEngine::compare(&old, &new);

        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.object_type == ObjectType::Table
            && c.change_type == ChangeType::Modified));
        assert_eq!(changes[0].new_value, Some(Value::from("VIEW")));
        assert_eq!(changes[1].old_value, Some(Value::from("postgres")));
    }

    #[test]
    fn test_added_and_removed_tables_swap_when_reversed() {
        let a = snapshot(vec![users_table(), table("audit", vec![]), table("legacy", vec![])]);
        let b = snapshot(vec![users_table(), table("orders", vec![]), table("payments", vec![])]);

        let forward = DiffEngine::compare(&a, &b);
        let backward = DiffEngine::compare(&b, &a);

        assert_eq!(
            names(&forward, ChangeType::Added, ObjectType::Table),
            names(&backward, ChangeType::Removed, ObjectType::Table)
        );
        assert_eq!(
            names(&forward, ChangeType::Removed, ObjectType::Table),
            names(&backward, ChangeType::Added, ObjectType::Table)
        );
    }

    #[test]
    fn test_emission_order_follows_source_sequences() {
        let old = snapshot(vec![
            table("zeta", vec![column("a", "integer", 1), column("b", "integer", 2)]),
            table("gone_b", vec![]),
            table("alpha", vec![column("x", "integer", 1)]),
            table("gone_a", vec![]),
        ]);
        let new = snapshot(vec![
            table("new_z", vec![]),
            table("alpha", vec![column("x", "bigint", 1), column("y", "integer", 2)]),
            table("new_a", vec![]),
            table("zeta", vec![column("c", "integer", 1), column("b", "integer", 2)]),
        ]);

        let order: Vec<String> = DiffEngine::compare(&old, &new)
            .iter()
            .map(|c| format!("{}/{}/{}", c.change_type, c.object_type, c.object_name))
            .collect();

        assert_eq!(
            order,
            vec![
                "added/table/new_z",
                "added/table/new_a",
                "removed/table/gone_b",
                "removed/table/gone_a",
                "added/column/c",
                "removed/column/a",
                "added/column/y",
                "modified/column/x",
            ]
        );

        let again: Vec<String> = DiffEngine::compare(&old, &new)
            .iter()
            .map(|c| format!("{}/{}/{}", c.change_type, c.object_type, c.object_name))
            .collect();
        assert_eq!(order, again);
    }

    #[test]
    fn test_rename_is_remove_plus_add() {
        let old = snapshot(vec![users_table()]);
        let mut new = old.clone();
        new.tables[0].columns[1].column_name = "full_name".into();

        let changes = DiffEngine::compare(&old, &new);

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].change_type, ChangeType::Added);
        assert_eq!(changes[0].object_name, "full_name");
        assert_eq!(changes[1].change_type, ChangeType::Removed);
        assert_eq!(changes[1].object_name, "name");
    }

    #[test]
    fn test_duplicate_table_names_last_definition_wins() {
        let old = snapshot(vec![users_table()]);
        let mut shadow = users_table();
        shadow.table_owner = "intruder".into();
        let new = snapshot(vec![users_table(), shadow]);

        let changes = DiffEngine::compare(&old, &new);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new_value, Some(Value::from("intruder")));
    }

    #[test]
    fn test_constraint_changes_follow_column_changes() {
        let old = snapshot(vec![users_table()]);
        let mut new = old.clone();
        new.tables[0].columns.push(varchar("email", 100, 3));
        new.tables[0].constraints.push(ConstraintDef {
            constraint_name: "users_email_key".into(),
            constraint_type: "UNIQUE".into(),
            column_name: "email".into(),
        });
        new.tables[0].constraints[0].constraint_type = "UNIQUE".into();

        let changes = DiffEngine::compare(&old, &new);
        let kinds: Vec<(ChangeType, ObjectType, &str)> = changes
            .iter()
            .map(|c| (c.change_type, c.object_type, c.object_name.as_str()))
            .collect();

        assert_eq!(
            kinds,
            vec![
                (ChangeType::Added, ObjectType::Column, "email"),
                (ChangeType::Added, ObjectType::Constraint, "users_email_key"),
                (ChangeType::Modified, ObjectType::Constraint, "users_pkey"),
            ]
        );
        assert_eq!(changes[1].parent_object.as_deref(), Some("users"));
    }

    #[test]
    fn test_summary_counts() {
        let old = snapshot(vec![users_table(), table("orders", vec![])]);
        let mut new = snapshot(vec![users_table(), table("invoices", vec![])]);
        new.tables[0].columns.push(column("email", "text", 3));
        new.tables[0].columns[0].is_nullable = true;

        let diff = DiffEngine::diff(Some(1), &old, Some(2), &new);

        assert_eq!(diff.summary.total_changes, 4);
        assert_eq!(diff.summary.tables_added, 1);
        assert_eq!(diff.summary.tables_removed, 1);
        assert_eq!(diff.summary.columns_added, 1);
        assert_eq!(diff.summary.columns_modified, 1);
        assert_eq!(diff.summary.tables_modified, 1);
        assert_eq!(diff.summary.added, 2);
        assert_eq!(diff.summary.removed, 1);
        assert_eq!(diff.summary.modified, 1);
    }

    #[test]
    fn test_stored_copies_compare_empty() {
        let store = MemorySnapshotStore::new();
        let snapshot = snapshot(vec![users_table()]);
        let first = store.put(&snapshot).unwrap();
        let second = store.put(&snapshot).unwrap();
        assert_ne!(first, second);

        let diff = DiffEngine::compare_stored(&store, first, second).unwrap();

        assert!(diff.changes.is_empty());
        assert_eq!(diff.from_snapshot, Some(first));
        assert_eq!(diff.to_snapshot, Some(second));
    }

    #[test]
    fn test_missing_snapshot_aborts_comparison() {
        let store = MemorySnapshotStore::new();
        let id = store.put(&snapshot(vec![users_table()])).unwrap();

        let err = DiffEngine::compare_stored(&store, id, 99).unwrap_err();
        assert!(matches!(err, AppError::SnapshotNotFound(99)));

        let err = DiffEngine::compare_stored(&store, 98, id).unwrap_err();
        assert!(matches!(err, AppError::SnapshotNotFound(98)));
    }

    #[test]
    fn test_latest_pair_needs_two_snapshots() {
        let store = MemorySnapshotStore::new();
        let mut first = snapshot(vec![users_table()]);
        store.put(&first).unwrap();
        assert!(matches!(
            DiffEngine::latest_pair(&store),
            Err(AppError::BadRequest(_))
        ));

        first.crawl_timestamp = first.crawl_timestamp + chrono::Duration::hours(1);
        let newer_id = store.put(&first).unwrap();

        let (older, newer) = DiffEngine::latest_pair(&store).unwrap();
        assert_eq!(newer.id, newer_id);
        assert!(older.id < newer.id);
    }
}
