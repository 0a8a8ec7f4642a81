//! Markdown change reports.
//!
//! Rendering is a pure function of its arguments. The generation time is
//! passed in so two renders of the same change list differ only in that line.

use crate::audit::AuditCorrelator;
use crate::snapshot::diff::{Change, ChangeType};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt::Write;

pub struct ReportGenerator;

impl ReportGenerator {
    pub fn diff_report(
        changes: &[Change],
        from_snapshot: Option<i64>,
        to_snapshot: Option<i64>,
        generated_at: DateTime<Utc>,
        correlator: Option<&AuditCorrelator>,
    ) -> String {
        let mut out = String::new();
        out.push_str("# Schema Change Report\n\n");

        if let (Some(from), Some(to)) = (from_snapshot, to_snapshot) {
            line(&mut out, format_args!("**Comparing snapshots:** {} → {}\n", from, to));
        }
        line(
            &mut out,
            format_args!(
                "**Generated:** {}\n",
                generated_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        );
        line(&mut out, format_args!("**Total changes:** {}\n", changes.len()));

        if changes.is_empty() {
            out.push_str("No changes detected between schemas.\n");
            return out;
        }

        let of_kind = |kind: ChangeType| {
            changes
                .iter()
                .filter(|c| c.change_type == kind)
                .collect::<Vec<_>>()
        };
        let added = of_kind(ChangeType::Added);
        let removed = of_kind(ChangeType::Removed);
        let modified = of_kind(ChangeType::Modified);

        out.push_str("## Summary\n\n");
        line(&mut out, format_args!("- **Added:** {} objects", added.len()));
        line(&mut out, format_args!("- **Removed:** {} objects", removed.len()));
        line(&mut out, format_args!("- **Modified:** {} objects\n", modified.len()));

        Self::section(&mut out, "Added Objects", &added, None);
        Self::section(&mut out, "Removed Objects", &removed, None);
        Self::section(&mut out, "Modified Objects", &modified, correlator);

        if let Some(correlator) = correlator {
            Self::users_section(&mut out, correlator);
        }

        out
    }

    fn section(out: &mut String, title: &str, changes: &[&Change], correlator: Option<&AuditCorrelator>) {
        if changes.is_empty() {
            return;
        }

        line(out, format_args!("## {}\n", title));
        for change in changes {
            let _ = write!(
                out,
                "- **{}:** `{}`",
                change.object_type.title(),
                change.object_name
            );
            if let Some(parent) = &change.parent_object {
                let _ = write!(out, " (in table `{}`)", parent);
            }
            out.push('\n');
            line(out, format_args!("  - {}", change.details));

            if change.change_type == ChangeType::Modified {
                if let (Some(old), Some(new)) = (present(&change.old_value), present(&change.new_value)) {
                    line(out, format_args!("    - Old: `{}`", value_text(old)));
                    line(out, format_args!("    - New: `{}`", value_text(new)));
                }
            }

            if let Some(correlator) = correlator {
                match correlator.attribute(change).event() {
                    Some(event) => {
                        line(
                            out,
                            format_args!(
                                "  - Changed by: {} at {}",
                                event.user_name,
                                event.event_time.format("%Y-%m-%d %H:%M:%S UTC")
                            ),
                        );
                        line(out, format_args!("  - Command: `{}`", event.command));
                    }
                    None => out.push_str("  - No attribution available\n"),
                }
            }
        }
        out.push('\n');
    }

    fn users_section(out: &mut String, correlator: &AuditCorrelator) {
        out.push_str("## Users\n\n");
        let users = correlator.user_summary();
        if users.is_empty() {
            out.push_str("No DDL activity recorded in this window.\n");
            return;
        }
        for (user, count) in users {
            line(out, format_args!("- **{}:** {} DDL events", user, count));
        }
    }
}

fn line(out: &mut String, args: std::fmt::Arguments<'_>) {
    let _ = out.write_fmt(args);
    out.push('\n');
}

fn present(value: &Option<Value>) -> Option<&Value> {
    value.as_ref().filter(|v| !v.is_null())
}

/// Strings render bare, everything else as JSON
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, AuditWindow};
    use crate::snapshot::diff::DiffEngine;
    use crate::snapshot::model::fixtures::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap()
    }

    fn sample_changes() -> Vec<Change> {
        let old = snapshot(vec![
            users_table(),
            table("orders", vec![column("id", "integer", 1)]),
        ]);
        let mut new = snapshot(vec![users_table()]);
        new.tables[0].columns[1].character_maximum_length = Some(100);
        new.tables[0].columns.push(varchar("email", 100, 3));
        DiffEngine::compare(&old, &new)
    }

    #[test]
    fn test_empty_change_list() {
        let report = ReportGenerator::diff_report(&[], Some(1), Some(2), at(), None);
        assert_eq!(
            report,
            "# Schema Change Report\n\n\
             **Comparing snapshots:** 1 → 2\n\n\
             **Generated:** 2024-03-01 03:00:00 UTC\n\n\
             **Total changes:** 0\n\n\
             No changes detected between schemas.\n"
        );
    }

    #[test]
    fn test_sections_and_values() {
        let report = ReportGenerator::diff_report(&sample_changes(), Some(1), Some(2), at(), None);

        assert!(report.contains("**Total changes:** 3"));
        assert!(report.contains("- **Added:** 1 objects"));
        assert!(report.contains("- **Removed:** 1 objects"));
        assert!(report.contains("- **Modified:** 1 objects"));
        assert!(report.contains("## Added Objects\n\n- **Column:** `email` (in table `users`)\n"));
        assert!(report.contains("## Removed Objects\n\n- **Table:** `orders`\n  - Table 'orders' was removed\n"));
        assert!(report.contains("    - Old: `50`\n    - New: `100`\n"));
        assert!(!report.contains("## Users"));
    }

    #[test]
    fn test_old_new_needs_both_values() {
        let mut old = snapshot(vec![users_table()]);
        old.tables[0].columns[1].column_default = Some("'anon'::character varying".to_string());
        let new = snapshot(vec![users_table()]);

        let changes = DiffEngine::compare(&old, &new);
        let report = ReportGenerator::diff_report(&changes, None, None, at(), None);

        assert!(!report.contains("Comparing snapshots"));
        assert!(report.contains("default value changed from ''anon'::character varying' to 'NULL'"));
        assert!(!report.contains("- Old:"));
    }

    #[test]
    fn test_render_is_deterministic_apart_from_timestamp() {
        let changes = sample_changes();
        let first = ReportGenerator::diff_report(&changes, Some(1), Some(2), at(), None);
        let second = ReportGenerator::diff_report(&changes, Some(1), Some(2), at(), None);
        let later = ReportGenerator::diff_report(
            &changes,
            Some(1),
            Some(2),
            at() + Duration::hours(5),
            None,
        );

        assert_eq!(first, second);
        let differing: Vec<(&str, &str)> = first
            .lines()
            .zip(later.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(differing.len(), 1);
        assert!(differing[0].0.starts_with("**Generated:**"));
    }

    #[test]
    fn test_attribution_lines() {
        let window = AuditWindow::between(at() - Duration::hours(1), at());
        let events = vec![AuditEvent::from_columns(
            at() - Duration::minutes(30),
            Some("alice".to_string()),
            Some("ALTER TABLE".to_string()),
            Some("table".to_string()),
            Some("public.users".to_string()),
            Some("ALTER TABLE users ALTER COLUMN name TYPE varchar(100)".to_string()),
        )];
        let correlator = AuditCorrelator::new("public", events, window);

        let report =
            ReportGenerator::diff_report(&sample_changes(), Some(1), Some(2), at(), Some(&correlator));

        assert!(report.contains("  - Changed by: alice at 2024-03-01 02:30:00 UTC\n"));
        assert!(report.contains("  - Command: `ALTER TABLE users ALTER COLUMN name TYPE varchar(100)`\n"));
        assert!(report.contains("## Users\n\n- **alice:** 1 DDL events\n"));
    }
}
