//! A round without schema changes: one worker, five inserts, checked
//! against a lagging replica.

use std::sync::Arc;
use std::time::Duration;

use crate::dml::DmlExecutor;
use crate::e2e_tests::helpers::{base_config, controller, entries_with_prefix, replicated};
use crate::round::RoundOutcome;
use crate::store::{COMMIT, Store};

#[tokio::test(start_paused = true)]
async fn test_dml_only_round_agrees_with_replica() {
    let dir = tempfile::tempdir().unwrap();
    let (primary, replica) = replicated(Duration::from_millis(200));
    let config = crate::config::RunConfig {
        executor: DmlExecutor::InsertUpdate,
        ..base_config(dir.path())
    };

    let report = controller(config, &primary, Some(Arc::new(replica.clone())))
        .run_round(1)
        .await;

    assert!(
        matches!(report.outcome, RoundOutcome::Success { rows: 5 }),
        "{:?}",
        report.outcome
    );
    let a = primary.fetch_rows("t").await.unwrap();
    let b = replica.fetch_rows("t").await.unwrap();
    assert_eq!(a.rows.len(), 5);
    assert_eq!(b.rows.len(), 5);

    let commits: Vec<_> = entries_with_prefix(&report.log, "dml-")
        .into_iter()
        .filter(|e| e.statement == COMMIT)
        .collect();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].error, None);
    assert!(entries_with_prefix(&report.log, "ddl-").is_empty());
}

#[tokio::test]
async fn test_update_conflict_round_without_replica() {
    let dir = tempfile::tempdir().unwrap();
    let primary = crate::store::MemoryStore::new();
    let config = crate::config::RunConfig {
        dml_threads: 4,
        dml_count: 20,
        batch: 3,
        ..base_config(dir.path())
    };

    let report = controller(config, &primary, None).run_round(2).await;

    assert!(matches!(report.outcome, RoundOutcome::Success { rows: 20 }));
    assert_eq!(primary.stats().commits, 4);
    assert_eq!(primary.fetch_rows("t").await.unwrap().rows.len(), 20);
}
