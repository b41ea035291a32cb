//! Worker key ranges are disjoint, so a duplicate key on commit is only a
//! legitimate abort in rounds that build unique indexes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ddl::DdlMode;
use crate::dml::DmlExecutor;
use crate::e2e_tests::helpers::{base_config, controller_over};
use crate::round::{RoundError, RoundOutcome};
use crate::store::{
    COMMIT, MemoryStore, Statement, Store, StoreError, StoreErrorKind, TableSnapshot, Transaction,
};

fn duplicate_entry() -> StoreError {
    StoreError::new(
        StoreErrorKind::DuplicateKey,
        Some(1062),
        "Duplicate entry '1' for key 't.uidx_0'",
    )
}

/// Every transaction rolls back on commit with a duplicate-key error.
struct DuplicateOnCommit {
    inner: MemoryStore,
}

struct DuplicateTransaction {
    inner: Box<dyn Transaction>,
}

#[async_trait]
impl Transaction for DuplicateTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<(), StoreError> {
        self.inner.execute(statement).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await?;
        Err(duplicate_entry())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

#[async_trait]
impl Store for DuplicateOnCommit {
    async fn execute(&self, statement: &Statement) -> Result<(), StoreError> {
        self.inner.execute(statement).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(DuplicateTransaction { inner }))
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

fn config(dir: &std::path::Path, modes: Vec<DdlMode>) -> crate::config::RunConfig {
    crate::config::RunConfig {
        modes,
        ddl_count: 1,
        executor: DmlExecutor::InsertUpdate,
        dml_threads: 2,
        dml_count: 6,
        ..base_config(dir)
    }
}

#[tokio::test]
async fn test_duplicate_key_without_unique_modes_fails_round() {
    let dir = tempfile::tempdir().unwrap();
    let primary = DuplicateOnCommit {
        inner: MemoryStore::new(),
    };

    let report = controller_over(config(dir.path(), Vec::new()), Arc::new(primary), None)
        .run_round(1)
        .await;

    let RoundOutcome::Failure(RoundError::Store {
        statement, error, ..
    }) = &report.outcome
    else {
        panic!("expected a store failure, got {:?}", report.outcome);
    };
    assert_eq!(statement, COMMIT);
    assert_eq!(error.kind(), StoreErrorKind::DuplicateKey);
}

#[tokio::test]
async fn test_duplicate_key_tolerated_with_unique_index_mode() {
    let dir = tempfile::tempdir().unwrap();
    let primary = DuplicateOnCommit {
        inner: MemoryStore::new(),
    };

    let report = controller_over(
        config(dir.path(), vec![DdlMode::CreateUniqueIndex]),
        Arc::new(primary),
        None,
    )
    .run_round(1)
    .await;

    assert!(
        matches!(report.outcome, RoundOutcome::Success { rows: 0 }),
        "{:?}",
        report.outcome
    );
}
