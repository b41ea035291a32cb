//! Columns added while transactions are open reach every committed row.

use crate::ddl::DdlMode;
use crate::dml::DmlExecutor;
use crate::e2e_tests::helpers::{base_config, controller, entries_with_prefix};
use crate::round::RoundOutcome;
use crate::store::{MemoryStore, Store, Value};

fn added_column(statement: &str) -> Option<&str> {
    statement
        .split_once(" ADD COLUMN ")
        .and_then(|(_, definition)| definition.split_whitespace().next())
}

#[tokio::test]
async fn test_added_columns_present_in_committed_rows() {
    for executor in [DmlExecutor::InsertUpdate, DmlExecutor::UpdateConflict] {
        let dir = tempfile::tempdir().unwrap();
        let primary = MemoryStore::new();
        let config = crate::config::RunConfig {
            modes: vec![DdlMode::AddColumn],
            ddl_count: 2,
            executor,
            dml_threads: 3,
            dml_count: 6,
            ..base_config(dir.path())
        };

        let report = controller(config, &primary, None).run_round(1).await;
        assert!(
            matches!(report.outcome, RoundOutcome::Success { rows: 6 }),
            "{executor}: {:?}",
            report.outcome
        );

        let ddl = entries_with_prefix(&report.log, "ddl-add-column");
        assert_eq!(ddl.len(), 2);
        let snapshot = primary.fetch_rows("t").await.unwrap();
        assert_eq!(snapshot.rows.len(), 6);
        let width = snapshot.columns.len();
        for row in &snapshot.rows {
            assert_eq!(row.len(), width, "{executor}: row narrower than the table");
        }
        for entry in &ddl {
            assert_eq!(entry.error, None);
            let name = added_column(&entry.statement).unwrap();
            let position = snapshot
                .column_index(name)
                .unwrap_or_else(|| panic!("{executor}: {name} missing from the table"));
            // Added after every worker took its schema, so no worker wrote it.
            assert!(position >= width - ddl.len(), "{name} at {position} of {width}");
            for row in &snapshot.rows {
                assert_eq!(row[position], Value::Null, "{executor}: {name} written");
            }
        }
        assert!(primary.check_table("t").await.is_ok());
    }
}

#[test]
fn test_added_column_name_parsed() {
    assert_eq!(
        added_column("ALTER TABLE t ADD COLUMN col_12 INT NULL"),
        Some("col_12")
    );
    assert_eq!(added_column("ALTER TABLE t DROP COLUMN col_1"), None);
}
