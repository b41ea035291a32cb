//! DML workers: the transaction side of a round.
//!
//! Every worker owns a disjoint slice of row ids and works against the
//! schema snapshot taken when the round started, never the live model the
//! mutators edit. Its transaction is opened before the schema changes land
//! and committed after they returned:
//!
//! - insert-update: `BEGIN`, insert rows, [ready-DDL], wait for the
//!   mutations, update the same rows, `COMMIT`
//! - update-conflict: insert rows in autocommit, `BEGIN`, update them,
//!   [ready-DDL], wait for the mutations, update them again, `COMMIT`
//!
//! A transaction aborted by the schema change is a legitimate outcome of the
//! race: a schema conflict always, a column gone once the changes landed,
//! and a duplicate key only in rounds that build unique indexes. It is
//! counted in the report, not raised.

mod values;

use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

pub use values::{key_values, random_value, row_values};

use crate::barrier::WorkerArrivals;
use crate::exec_log::{ExecutionLog, ThreadLog};
use crate::round::{Participant, ParticipantReport, RoundError};
use crate::schema::Schema;
use crate::store::{BEGIN, COMMIT, ROLLBACK, Statement, Store, StoreError, StoreErrorKind, Transaction};

/// Most columns a single `UPDATE` assigns.
const MAX_UPDATED_COLUMNS: usize = 3;

/// Shape of a worker's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmlExecutor {
    UpdateConflict,
    InsertUpdate,
}

/// Error returned for an unrecognized executor name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownExecutorError(pub String);

impl fmt::Display for UnknownExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid dml executor name `{}`", self.0)
    }
}

impl std::error::Error for UnknownExecutorError {}

impl DmlExecutor {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::UpdateConflict => "update-conflict",
            Self::InsertUpdate => "insert-update",
        }
    }
}

impl fmt::Display for DmlExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DmlExecutor {
    type Err = UnknownExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update-conflict" => Ok(Self::UpdateConflict),
            "insert-update" => Ok(Self::InsertUpdate),
            _ => Err(UnknownExecutorError(s.to_string())),
        }
    }
}

/// Row ids of worker `index` out of `workers`, splitting `total` rows.
#[must_use]
pub fn row_slice(total: u64, workers: usize, index: usize) -> Range<u64> {
    let workers = workers.max(1) as u64;
    let index = index as u64;
    (total * index / workers)..(total * (index + 1) / workers)
}

/// `INSERT` statements covering `rows`, `batch` rows each (0 = one
/// statement). Returned with the row ids each covers.
pub fn insert_batches<R: Rng + ?Sized>(
    schema: &Schema,
    table: &str,
    rows: Range<u64>,
    batch: usize,
    rng: &mut R,
) -> Vec<(Range<u64>, Statement)> {
    let batch = if batch == 0 {
        (rows.end - rows.start).max(1)
    } else {
        batch as u64
    };
    let columns: Vec<String> = schema.columns().iter().map(|c| c.name.clone()).collect();
    let mut statements = Vec::new();
    let mut start = rows.start;
    while start < rows.end {
        let end = (start + batch).min(rows.end);
        statements.push((
            start..end,
            Statement::Insert {
                table: table.to_string(),
                columns: columns.clone(),
                rows: (start..end).map(|id| row_values(schema, id, rng)).collect(),
            },
        ));
        start = end;
    }
    statements
}

/// `UPDATE` of some non-key columns of row `row_id`; `None` when the schema
/// has no non-key column.
pub fn update_statement<R: Rng + ?Sized>(
    schema: &Schema,
    table: &str,
    row_id: u64,
    rng: &mut R,
) -> Option<Statement> {
    let candidates: Vec<_> = schema
        .columns()
        .iter()
        .filter(|c| !schema.is_key_column(&c.name))
        .collect();
    if candidates.is_empty() {
        return None;
    }
    let width = rng.random_range(1..=MAX_UPDATED_COLUMNS.min(candidates.len()));
    let assignments = candidates
        .choose_multiple(rng, width)
        .map(|c| (c.name.clone(), random_value(c, rng)))
        .collect::<Vec<_>>();
    Some(Statement::Update {
        table: table.to_string(),
        assignments,
        key: key_values(schema, row_id),
    })
}

/// Whether a transaction failing with `error` lost a legitimate race.
/// A missing column only counts once the schema changes may have landed.
/// Key ranges are disjoint, so a duplicate key needs a unique index built
/// during the round.
fn expected_abort(error: &StoreError, after_mutations: bool, unique_indexes: bool) -> bool {
    match error.kind() {
        StoreErrorKind::MissingObject => after_mutations,
        StoreErrorKind::DuplicateKey => unique_indexes,
        kind => kind.is_expected_abort(),
    }
}

/// One worker task.
pub struct Worker {
    pub executor: DmlExecutor,
    pub index: usize,
    pub table: String,
    /// Schema snapshot taken at round start.
    pub schema: Arc<Schema>,
    pub rows: Range<u64>,
    pub batch: usize,
    /// Whether a mode of this round builds unique indexes.
    pub unique_indexes: bool,
    pub store: Arc<dyn Store>,
    pub log: Arc<ExecutionLog>,
    pub rng: StdRng,
    pub arrivals: WorkerArrivals,
}

/// State of a running worker.
struct Session {
    table: String,
    schema: Arc<Schema>,
    store: Arc<dyn Store>,
    thread: ThreadLog,
    rng: StdRng,
    unique_indexes: bool,
    report: ParticipantReport,
}

impl Session {
    fn expected_abort(&self, error: &StoreError, after_mutations: bool) -> bool {
        expected_abort(error, after_mutations, self.unique_indexes)
    }

    fn fail(&self, statement: &str, error: StoreError) -> RoundError {
        RoundError::store(self.thread.name(), statement.to_string(), error)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, RoundError> {
        self.thread
            .run(BEGIN, self.store.begin())
            .await
            .map_err(|e| self.fail(BEGIN, e))
    }

    async fn execute(
        &mut self,
        txn: &mut Box<dyn Transaction>,
        statement: &Statement,
    ) -> Result<(), StoreError> {
        let sql = statement.to_string();
        let result = self.thread.run(&sql, txn.execute(statement)).await;
        if result.is_ok() {
            self.report.executed += 1;
        }
        result
    }

    /// Roll back after `error` hit `sql`. Expected aborts end the worker
    /// with a report, anything else fails the round.
    async fn abandon(
        mut self,
        txn: Box<dyn Transaction>,
        sql: &str,
        error: StoreError,
        after_mutations: bool,
    ) -> Result<ParticipantReport, RoundError> {
        if let Err(e) = self.thread.run(ROLLBACK, txn.rollback()).await {
            tracing::debug!(thread = self.thread.name(), "rollback after abort: {e}");
        }
        if self.expected_abort(&error, after_mutations) {
            tracing::info!(thread = self.thread.name(), %sql, "transaction aborted: {error}");
            self.report.aborted = true;
            return Ok(self.report);
        }
        Err(self.fail(sql, error))
    }

    async fn commit(
        mut self,
        txn: Box<dyn Transaction>,
        durable_on_commit: u64,
    ) -> Result<ParticipantReport, RoundError> {
        match self.thread.run(COMMIT, txn.commit()).await {
            Ok(()) => {
                self.report.durable_rows += durable_on_commit;
                Ok(self.report)
            }
            Err(error) if self.expected_abort(&error, true) => {
                tracing::info!(thread = self.thread.name(), "commit aborted: {error}");
                self.report.aborted = true;
                Ok(self.report)
            }
            Err(error) => Err(self.fail(COMMIT, error)),
        }
    }

    fn update_for(&mut self, row_id: u64) -> Option<Statement> {
        update_statement(&self.schema, &self.table, row_id, &mut self.rng)
    }
}

async fn insert_update(
    mut session: Session,
    rows: Range<u64>,
    batch: usize,
    mut arrivals: WorkerArrivals,
) -> Result<ParticipantReport, RoundError> {
    arrivals.wait_for_plans().await;
    let mut txn = session.begin().await?;
    let inserts = insert_batches(&session.schema, &session.table, rows.clone(), batch, &mut session.rng);
    for (_, statement) in &inserts {
        if let Err(e) = session.execute(&mut txn, statement).await {
            return session.abandon(txn, &statement.to_string(), e, false).await;
        }
    }
    arrivals.opened();

    arrivals.wait_for_mutations().await;
    for row_id in rows.clone() {
        let Some(statement) = session.update_for(row_id) else {
            break;
        };
        if let Err(e) = session.execute(&mut txn, &statement).await {
            return session.abandon(txn, &statement.to_string(), e, true).await;
        }
    }
    session.commit(txn, rows.end - rows.start).await
}

async fn update_conflict(
    mut session: Session,
    rows: Range<u64>,
    batch: usize,
    mut arrivals: WorkerArrivals,
) -> Result<ParticipantReport, RoundError> {
    arrivals.wait_for_plans().await;
    let inserts = insert_batches(&session.schema, &session.table, rows, batch, &mut session.rng);
    let mut seeded = Vec::new();
    for (ids, statement) in &inserts {
        let sql = statement.to_string();
        match session.thread.run(&sql, session.store.execute(statement)).await {
            Ok(()) => {
                session.report.executed += 1;
                session.report.durable_rows += ids.end - ids.start;
                seeded.extend(ids.clone());
            }
            // A unique index created during setup may reject random data.
            Err(e) if session.expected_abort(&e, false) => {
                tracing::info!(thread = session.thread.name(), "seed rows rejected: {e}");
            }
            Err(e) => return Err(session.fail(&sql, e)),
        }
    }

    let mut txn = session.begin().await?;
    for &row_id in &seeded {
        let Some(statement) = session.update_for(row_id) else {
            break;
        };
        if let Err(e) = session.execute(&mut txn, &statement).await {
            return session.abandon(txn, &statement.to_string(), e, false).await;
        }
    }
    arrivals.opened();

    arrivals.wait_for_mutations().await;
    for &row_id in &seeded {
        let Some(statement) = session.update_for(row_id) else {
            break;
        };
        if let Err(e) = session.execute(&mut txn, &statement).await {
            return session.abandon(txn, &statement.to_string(), e, true).await;
        }
    }
    // Seeded rows are durable whether or not the updates commit.
    session.commit(txn, 0).await
}

#[async_trait]
impl Participant for Worker {
    async fn run(self: Box<Self>) -> Result<ParticipantReport, RoundError> {
        let Self {
            executor,
            index,
            table,
            schema,
            rows,
            batch,
            unique_indexes,
            store,
            log,
            rng,
            arrivals,
        } = *self;
        let thread = log.register_thread(&format!("dml-{index}"))?;
        let session = Session {
            table,
            schema,
            store,
            report: ParticipantReport::new(thread.name()),
            thread,
            rng,
            unique_indexes,
        };
        match executor {
            DmlExecutor::InsertUpdate => insert_update(session, rows, batch, arrivals).await,
            DmlExecutor::UpdateConflict => update_conflict(session, rows, batch, arrivals).await,
        }
    }
}
