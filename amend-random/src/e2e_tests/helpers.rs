//! Common helpers for end-to-end tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RunConfig;
use crate::exec_log::{ExecutionLog, LogEntry};
use crate::round::RoundController;
use crate::store::{MemoryOptions, MemoryStore, Statement, Store, StoreError, TableSnapshot, Transaction};
use crate::time::SimulatedTimeSource;

/// A small, fast round writing into `log_dir`.
pub fn base_config(log_dir: &Path) -> RunConfig {
    RunConfig {
        dml_threads: 1,
        dml_count: 5,
        batch: 1,
        log_dir: log_dir.to_path_buf(),
        seed: 7,
        timeout: Duration::from_secs(60),
        sync_settle: Duration::from_millis(10),
        sync_poll: Duration::from_millis(5),
        ..RunConfig::default()
    }
}

/// A controller on a clock that ticks once per read, so log timestamps are
/// distinct and follow the order they were taken in.
pub fn controller(
    config: RunConfig,
    primary: &MemoryStore,
    replica: Option<Arc<dyn Store>>,
) -> RoundController {
    controller_over(config, Arc::new(primary.clone()), replica)
}

/// Like [`controller`], over any primary store.
pub fn controller_over(
    config: RunConfig,
    primary: Arc<dyn Store>,
    replica: Option<Arc<dyn Store>>,
) -> RoundController {
    RoundController::new(
        config,
        primary,
        replica,
        Arc::new(SimulatedTimeSource::stepping(1_000_000, 1)),
    )
}

/// A primary replicating into a second store after `lag`.
///
/// Must be called inside a Tokio runtime.
pub fn replicated(lag: Duration) -> (MemoryStore, MemoryStore) {
    let replica = MemoryStore::new();
    let primary = MemoryStore::with_options(MemoryOptions::new(1).with_replica(replica.clone(), lag));
    (primary, replica)
}

/// Entries of every thread whose name starts with `prefix`.
pub fn entries_with_prefix(log: &ExecutionLog, prefix: &str) -> Vec<LogEntry> {
    log.thread_names()
        .unwrap()
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .flat_map(|name| log.entries(&name).unwrap())
        .collect()
}

/// A replica that loses the last row of every read.
pub struct LossyReplica {
    pub inner: MemoryStore,
}

#[async_trait]
impl Store for LossyReplica {
    async fn execute(&self, statement: &Statement) -> Result<(), StoreError> {
        self.inner.execute(statement).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        self.inner.begin().await
    }

    async fn fetch_rows(&self, table: &str) -> Result<TableSnapshot, StoreError> {
        let mut snapshot = self.inner.fetch_rows(table).await?;
        snapshot.rows.pop();
        Ok(snapshot)
    }

    async fn check_table(&self, table: &str) -> Result<(), StoreError> {
        self.inner.check_table(table).await
    }

    async fn has_marker(&self, table: &str, marker: i64) -> Result<bool, StoreError> {
        self.inner.has_marker(table, marker).await
    }
}
