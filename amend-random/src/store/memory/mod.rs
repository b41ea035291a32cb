//! In-process store for testing the tester.
//!
//! `MemoryStore` models one database with transactions that amend their
//! writes onto the schema current at commit (see [`catalog`]). It supports:
//! - Connection refusals for the first N calls
//! - Seeded random latency before every operation
//! - Stalling forever at `BEGIN` or `COMMIT`
//! - An asynchronous replica fed a full catalog after every change
//!
//! Clones share state, so a clone handed to a test keeps observing the store
//! a round runs against.

mod catalog;

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::Instant;

use catalog::{Catalog, SchemaView};

use super::{Statement, Store, StoreError, TableSnapshot, Transaction};

/// Where a stalled store stops responding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallPoint {
    Begin,
    Commit,
}

/// Fault injection and replication settings.
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    /// Seed for the latency RNG.
    pub seed: u64,
    /// Upper bound of the random delay before each operation. `None` for no
    /// delay.
    pub max_latency: Option<Duration>,
    /// Never return from this point.
    pub stall: Option<StallPoint>,
    /// Number of leading calls refused as if the server were down.
    pub refused_connections: u32,
    /// Store receiving every committed change after a lag.
    pub replica: Option<(MemoryStore, Duration)>,
}

impl MemoryOptions {
    /// Options with no faults and no replica.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            seed,
            max_latency: None,
            stall: None,
            refused_connections: 0,
            replica: None,
        }
    }

    #[must_use]
    pub const fn with_latency(mut self, max: Duration) -> Self {
        self.max_latency = Some(max);
        self
    }

    #[must_use]
    pub const fn with_stall(mut self, point: StallPoint) -> Self {
        self.stall = Some(point);
        self
    }

    #[must_use]
    pub const fn with_refused_connections(mut self, count: u32) -> Self {
        self.refused_connections = count;
        self
    }

    #[must_use]
    pub fn with_replica(mut self, replica: MemoryStore, lag: Duration) -> Self {
        self.replica = Some((replica, lag));
        self
    }
}

/// Counters of store activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Autocommit statements applied.
    pub statements: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Commits rejected.
    pub failed_commits: u64,
}

struct Shared {
    catalog: Mutex<Catalog>,
    rng: Mutex<StdRng>,
    max_latency: Option<Duration>,
    stall: Option<StallPoint>,
    refusals_left: AtomicU32,
    replica: Option<mpsc::UnboundedSender<(Instant, Catalog)>>,
    statements: AtomicU64,
    commits: AtomicU64,
    failed_commits: AtomicU64,
}

/// An in-memory database.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store without faults or replica.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(MemoryOptions::new(0))
    }

    /// Create a store.
    ///
    /// With a replica configured this spawns the replication task, so it
    /// must be called inside a Tokio runtime. The task exits once every
    /// clone of the store is dropped.
    #[must_use]
    pub fn with_options(options: MemoryOptions) -> Self {
        let replica = options
            .replica
            .map(|(replica, lag)| spawn_replication(replica, lag));
        Self {
            shared: Arc::new(Shared {
                catalog: Mutex::new(Catalog::default()),
                rng: Mutex::new(StdRng::seed_from_u64(options.seed)),
                max_latency: options.max_latency,
                stall: options.stall,
                refusals_left: AtomicU32::new(options.refused_connections),
                replica,
                statements: AtomicU64::new(0),
                commits: AtomicU64::new(0),
                failed_commits: AtomicU64::new(0),
            }),
        }
    }

    /// Refusals still to be injected.
    #[must_use]
    pub fn refusals_left(&self) -> u32 {
        self.shared.refusals_left.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            statements: self.shared.statements.load(Ordering::SeqCst),
            commits: self.shared.commits.load(Ordering::SeqCst),
            failed_commits: self.shared.failed_commits.load(Ordering::SeqCst),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Catalog> {
        self.shared
            .catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Send the committed catalog to the replica, if any. Called with the
    /// catalog locked so the replica sees changes in commit order.
    fn publish(&self, catalog: &Catalog) {
        if let Some(tx) = &self.shared.replica {
            #[allow(clippy::disallowed_methods)] // Replica needs its own copy
            let copy = catalog.clone();
            // The receiver only goes away with the runtime.
            let _ = tx.send((Instant::now(), copy));
        }
    }

    fn install(&self, catalog: Catalog) {
        *self.lock() = catalog;
    }

    fn take_refusal(&self) -> Result<(), StoreError> {
        let refused = self
            .shared
            .refusals_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(StoreError::connection_refused(
                "dial tcp: connect: connection refused",
            ));
        }
        Ok(())
    }

    async fn pause(&self) {
        let Some(max) = self.shared.max_latency else {
            return;
        };
        let delay = {
            let mut rng = self.shared.rng.lock().unwrap_or_else(PoisonError::into_inner);
            rng.random_range(Duration::ZERO..=max)
        };
        tokio::time::sleep(delay).await;
    }

    async fn stall_at(&self, point: StallPoint) {
        if self.shared.stall == Some(point) {
            tracing::debug!(?point, "memory store stalling");
            std::future::pending::<()>().await;
        }
    }
}

fn spawn_replication(
    replica: MemoryStore,
    lag: Duration,
) -> mpsc::UnboundedSender<(Instant, Catalog)> {
    let (tx, mut rx) = mpsc::unbounded_channel::<(Instant, Catalog)>();
    tokio::spawn(async move {
        while let Some((committed_at, catalog)) = rx.recv().await {
            tokio::time::sleep_until(committed_at + lag).await;
            replica.install(catalog);
        }
        tracing::debug!("replication task stopped");
    });
    tx
}

#[async_trait]
impl Store for MemoryStore {
    async fn execute(&self, statement: &Statement) -> Result<(), StoreError> {
        self.take_refusal()?;
        self.pause().await;
        let mut catalog = self.lock();
        catalog.apply(statement)?;
        self.shared.statements.fetch_add(1, Ordering::SeqCst);
        self.publish(&catalog);
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        self.take_refusal()?;
        self.pause().await;
        self.stall_at(StallPoint::Begin).await;
        let (view, begin_version) = {
            let catalog = self.lock();
            (catalog.view(), catalog.schema_version())
        };
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            view,
            begin_version,
            writes: Vec::new(),
        }))
    }

    async fn fetch_rows(&self, table: &str) -> Result<TableSnapshot, StoreError> {
        self.take_refusal()?;
        self.pause().await;
        self.lock().snapshot(table)
    }

    async fn check_table(&self, table: &str) -> Result<(), StoreError> {
        self.take_refusal()?;
        self.lock().check(table)
    }

    async fn has_marker(&self, table: &str, marker: i64) -> Result<bool, StoreError> {
        self.take_refusal()?;
        self.lock().has_marker(table, marker)
    }
}

/// A transaction buffering its writes until commit.
struct MemoryTransaction {
    store: MemoryStore,
    view: SchemaView,
    begin_version: u64,
    writes: Vec<Statement>,
}

impl MemoryTransaction {
    /// Apply the buffered writes atomically.
    fn apply(&self) -> Result<(), StoreError> {
        let mut catalog = self.store.lock();
        #[allow(clippy::disallowed_methods)] // Scratch copy, discarded on failure
        let mut scratch = catalog.clone();
        for write in &self.writes {
            scratch.apply_write(write, Some(self.begin_version))?;
        }
        let mut touched: Vec<&str> = self.writes.iter().filter_map(Statement::table).collect();
        touched.sort_unstable();
        touched.dedup();
        for table in touched {
            scratch.validate_unique(table)?;
        }
        *catalog = scratch;
        self.store.publish(&catalog);
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<(), StoreError> {
        self.store.pause().await;
        Catalog::validate_write(&self.view, statement)?;
        #[allow(clippy::disallowed_methods)] // Buffered until commit
        self.writes.push(statement.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.store.pause().await;
        self.store.stall_at(StallPoint::Commit).await;
        let result = self.apply();
        let counter = if result.is_ok() {
            &self.store.shared.commits
        } else {
            &self.store.shared.failed_commits
        };
        counter.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
