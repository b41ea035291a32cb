//! A schema change failing with an error its mode does not tolerate fails
//! the round.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ddl::DdlMode;
use crate::e2e_tests::helpers::{base_config, controller_over};
use crate::round::{RoundError, RoundOutcome};
use crate::store::{
    MemoryStore, Statement, Store, StoreError, StoreErrorKind, TableSnapshot, Transaction,
};

/// Rejects every `ADD COLUMN` with a server error.
struct RejectingAddColumn {
    inner: MemoryStore,
}

#[async_trait]
impl Store for RejectingAddColumn {
    async fn execute(&self, statement: &Statement) -> Result<(), StoreError> {
        if matches!(statement, Statement::AddColumn { .. }) {
            return Err(StoreError::new(
                StoreErrorKind::Other,
                Some(1105),
                "unsupported add column",
            ));
        }
        self.inner.execute(statement).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        self.inner.begin().await
    }

    async fn fetch_rows(&self, table: &str) -> Result<TableSnapshot, StoreError> {
        self.inner.fetch_rows(table).await
    }

    async fn check_table(&self, table: &str) -> Result<(), StoreError> {
        self.inner.check_table(table).await
    }

    async fn has_marker(&self, table: &str, marker: i64) -> Result<bool, StoreError> {
        self.inner.has_marker(table, marker).await
    }
}

#[tokio::test]
async fn test_rejected_schema_change_fails_round() {
    let dir = tempfile::tempdir().unwrap();
    let primary = RejectingAddColumn {
        inner: MemoryStore::new(),
    };
    let config = crate::config::RunConfig {
        modes: vec![DdlMode::AddColumn],
        ddl_count: 1,
        ..base_config(dir.path())
    };

    let report = controller_over(config, Arc::new(primary), None)
        .run_round(2)
        .await;

    let RoundOutcome::Failure(RoundError::Store {
        thread,
        statement,
        error,
    }) = &report.outcome
    else {
        panic!("expected a store failure, got {:?}", report.outcome);
    };
    assert_eq!(thread, "ddl-add-column");
    assert!(statement.contains(" ADD COLUMN "), "{statement}");
    assert_eq!(error.kind(), StoreErrorKind::Other);
    assert!(report.log_path.is_some());
}
