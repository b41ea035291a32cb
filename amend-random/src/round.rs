//! One round: fresh database, fresh schema, mutators racing workers, then a
//! consistency check.
//!
//! ```text
//! Init -> SchemaReady -> Running -> Completed | Failed | TimedOut
//!              |
//!              +-> Skipped (table could not be created)
//! ```
//!
//! The round body runs as its own task. [`RoundController::run_round`]
//! bounds it with the configured timeout and aborts it on expiry; the body
//! owns the participants' `JoinSet`, so aborting it cancels every mutator
//! and worker at their next suspension point.
//!
//! # Invariants
//!
//! - every mutator plans (and registers its indexes) before any worker opens
//!   a transaction
//! - the index registry is empty outside a round
//! - the first participant error is the round's error; the rest are logged

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinSet;

use crate::barrier::BarrierSet;
use crate::config::RunConfig;
use crate::ddl::Mutator;
use crate::dml::{Worker, row_slice};
use crate::exec_log::{ExecutionLog, LogError, ThreadLog};
use crate::oracle::{self, CheckError};
use crate::schema::{Column, DataType, IndexRegistry, Schema, SchemaGenConfig, generate_schema};
use crate::store::{Statement, Store, StoreError, StoreErrorKind, Value};
use crate::time::TimeSource;

/// Name the primary key is registered under.
pub const PRIMARY_INDEX: &str = "primary";

/// Live per-round model shared by the mutators.
#[derive(Debug)]
pub struct RoundState {
    /// The schema as the mutators' planned changes leave it.
    pub schema: Schema,
    pub indexes: IndexRegistry,
    /// Columns a mutator has planned to drop, add or redefine.
    pub claimed: HashSet<String>,
}

impl RoundState {
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            indexes: IndexRegistry::new(),
            claimed: HashSet::new(),
        }
    }

    /// Start over with `schema` and empty registries.
    pub fn reset(&mut self, schema: Schema) {
        self.schema = schema;
        self.indexes.reset();
        self.claimed.clear();
    }
}

/// What a participant did in a round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantReport {
    pub thread: String,
    /// Statements that succeeded.
    pub executed: usize,
    /// Schema changes that failed in a tolerated way.
    pub tolerated: usize,
    /// Whether the transaction lost the race and was rolled back.
    pub aborted: bool,
    /// Rows this participant left committed.
    pub durable_rows: u64,
}

impl ParticipantReport {
    #[must_use]
    pub fn new(thread: &str) -> Self {
        Self {
            thread: thread.to_string(),
            ..Self::default()
        }
    }
}

/// A mutator or worker task.
#[async_trait]
pub trait Participant: Send {
    async fn run(self: Box<Self>) -> Result<ParticipantReport, RoundError>;
}

/// Why a round failed.
#[derive(Debug)]
pub enum RoundError {
    Store {
        thread: String,
        statement: String,
        error: StoreError,
    },
    Log(LogError),
    Check(CheckError),
    Panicked(String),
}

impl RoundError {
    #[must_use]
    pub fn store(thread: &str, statement: String, error: StoreError) -> Self {
        Self::Store {
            thread: thread.to_string(),
            statement,
            error,
        }
    }
}

impl fmt::Display for RoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store {
                thread,
                statement,
                error,
            } => write!(f, "[{thread}] {statement}: {error}"),
            Self::Log(e) => write!(f, "execution log: {e}"),
            Self::Check(e) => write!(f, "{e}"),
            Self::Panicked(message) => write!(f, "participant panicked: {message}"),
        }
    }
}

impl std::error::Error for RoundError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store { error, .. } => Some(error),
            Self::Log(e) => Some(e),
            Self::Check(e) => Some(e),
            Self::Panicked(_) => None,
        }
    }
}

impl From<LogError> for RoundError {
    fn from(e: LogError) -> Self {
        Self::Log(e)
    }
}

impl From<CheckError> for RoundError {
    fn from(e: CheckError) -> Self {
        Self::Check(e)
    }
}

/// How a round ended.
#[derive(Debug)]
pub enum RoundOutcome {
    /// Every participant finished and the data checked out.
    Success { rows: u64 },
    /// The table could not be created; nothing ran.
    Skipped(String),
    Failure(RoundError),
    TimedOut,
}

impl RoundOutcome {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Skipped(_) => "skipped",
            Self::Failure(_) => "failure",
            Self::TimedOut => "timeout",
        }
    }
}

/// Result of [`RoundController::run_round`].
#[derive(Debug)]
pub struct RoundReport {
    pub ordinal: u64,
    pub seed: u64,
    pub outcome: RoundOutcome,
    pub log: Arc<ExecutionLog>,
    /// Where the log was flushed, if it was.
    pub log_path: Option<PathBuf>,
}

/// Runs rounds against a primary and an optional replica.
pub struct RoundController {
    config: Arc<RunConfig>,
    primary: Arc<dyn Store>,
    replica: Option<Arc<dyn Store>>,
    clock: Arc<dyn TimeSource>,
    state: Arc<Mutex<RoundState>>,
}

impl fmt::Debug for RoundController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundController")
            .field("table", &self.config.table)
            .field("replica", &self.replica.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything the round task owns.
struct RoundBody {
    config: Arc<RunConfig>,
    primary: Arc<dyn Store>,
    replica: Option<Arc<dyn Store>>,
    clock: Arc<dyn TimeSource>,
    state: Arc<Mutex<RoundState>>,
    log: Arc<ExecutionLog>,
    rng: StdRng,
}

/// Spread a run seed over round ordinals.
const fn round_seed(seed: u64, ordinal: u64) -> u64 {
    seed ^ ordinal.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn checkpoint_schema() -> Schema {
    Schema::new(
        vec![Column::new(0, "id".to_string(), DataType::BigInt, 0, true)],
        Vec::new(),
    )
}

impl RoundController {
    #[must_use]
    pub fn new(
        config: RunConfig,
        primary: Arc<dyn Store>,
        replica: Option<Arc<dyn Store>>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            primary,
            replica,
            clock,
            state: Arc::new(Mutex::new(RoundState::new(Schema::new(Vec::new(), Vec::new())))),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run round `ordinal` to completion or its deadline.
    ///
    /// The log is flushed to the configured directory when the round fails
    /// or times out, and after a success when only one round was asked for.
    #[allow(clippy::disallowed_methods)] // Arc handles for the round task
    pub async fn run_round(&self, ordinal: u64) -> RoundReport {
        let seed = round_seed(self.config.seed, ordinal);
        let log = Arc::new(ExecutionLog::new(ordinal, Arc::clone(&self.clock)));
        let body = RoundBody {
            config: Arc::clone(&self.config),
            primary: Arc::clone(&self.primary),
            replica: self.replica.clone(),
            clock: Arc::clone(&self.clock),
            state: Arc::clone(&self.state),
            log: Arc::clone(&log),
            rng: StdRng::seed_from_u64(seed),
        };
        tracing::info!(ordinal, seed, "round starting");

        let mut handle = tokio::spawn(body.run());
        let outcome = match tokio::time::timeout(self.config.timeout, &mut handle).await {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(e))) => RoundOutcome::Failure(e),
            Ok(Err(e)) => RoundOutcome::Failure(RoundError::Panicked(e.to_string())),
            Err(_) => {
                handle.abort();
                // Wait for the cancellation so no participant outlives the round.
                let _ = handle.await;
                RoundOutcome::TimedOut
            }
        };

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.indexes.reset();
            state.claimed.clear();
        }

        let flush = match outcome {
            RoundOutcome::Failure(_) | RoundOutcome::TimedOut => true,
            RoundOutcome::Success { .. } => self.config.rounds == 1,
            RoundOutcome::Skipped(_) => false,
        };
        let log_path = if flush {
            match log.flush(&self.config.log_dir) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::error!(ordinal, "cannot write execution log: {e}");
                    None
                }
            }
        } else {
            None
        };
        tracing::info!(ordinal, outcome = outcome.name(), "round finished");

        RoundReport {
            ordinal,
            seed,
            outcome,
            log,
            log_path,
        }
    }
}

async fn exec(store: &dyn Store, thread: &ThreadLog, statement: &Statement) -> Result<(), RoundError> {
    let sql = statement.to_string();
    thread
        .run(&sql, store.execute(statement))
        .await
        .map_err(|e| RoundError::store(thread.name(), sql, e))
}

impl RoundBody {
    async fn run(mut self) -> Result<RoundOutcome, RoundError> {
        let setup = self.log.register_thread("setup")?;
        self.init(&setup).await?;

        let schema = generate_schema(
            &mut self.rng,
            &SchemaGenConfig::default(),
            self.config.min_columns(),
        );
        if let Err(reason) = self.create_table(&setup, &schema).await {
            tracing::warn!("round skipped: {reason}");
            return Ok(RoundOutcome::Skipped(reason));
        }

        let rows = self.race(schema).await?;
        self.verify(rows).await?;
        Ok(RoundOutcome::Success { rows })
    }

    /// Recreate the database and the checkpoint table.
    async fn init(&self, setup: &ThreadLog) -> Result<(), RoundError> {
        let store = self.primary.as_ref();
        let database = &self.config.database;
        exec(store, setup, &Statement::DropDatabase { name: database.clone() }).await?;
        let create = Statement::CreateDatabase { name: database.clone() };
        match exec(store, setup, &create).await {
            Err(RoundError::Store { error, .. }) if error.kind() == StoreErrorKind::AlreadyExists => {
                tracing::debug!("database survived the drop: {error}");
            }
            result => result?,
        }
        let checkpoint = self.config.checkpoint_table();
        exec(store, setup, &Statement::DropTable { table: checkpoint.clone() }).await?;
        exec(
            store,
            setup,
            &Statement::CreateTable {
                table: checkpoint,
                schema: checkpoint_schema(),
                clustered: false,
            },
        )
        .await
    }

    /// Reset the model to `schema` and create the table. `Err` carries the
    /// reason to skip the round.
    async fn create_table(&self, setup: &ThreadLog, schema: &Schema) -> Result<(), String> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.reset(schema.snapshot());
            let key = schema.primary_key().to_vec();
            state
                .indexes
                .register(PRIMARY_INDEX, &key, true)
                .map_err(|e| e.to_string())?;
        }
        let table = &self.config.table;
        tracing::debug!(
            columns = schema.columns().len(),
            "{}",
            schema.render_create_table(table, self.config.clustered_index)
        );
        exec(self.primary.as_ref(), setup, &Statement::DropTable { table: table.clone() })
            .await
            .map_err(|e| e.to_string())?;
        exec(
            self.primary.as_ref(),
            setup,
            &Statement::CreateTable {
                table: table.clone(),
                schema: schema.snapshot(),
                clustered: self.config.clustered_index,
            },
        )
        .await
        .map_err(|e| e.to_string())
    }

    /// Run every mutator and worker. Returns the rows the workers left
    /// committed.
    #[allow(clippy::disallowed_methods)] // Arc handles for the participants
    async fn race(&mut self, schema: Schema) -> Result<u64, RoundError> {
        let config = Arc::clone(&self.config);
        let snapshot = Arc::new(schema);
        let total = config.dml_count_for(&snapshot);
        let unique_indexes = config.modes.iter().any(|mode| mode.creates_unique_index());
        let barriers = BarrierSet::new(config.modes.len(), config.dml_threads);
        tracing::info!(
            modes = config.modes.len(),
            workers = config.dml_threads,
            rows = total,
            executor = %config.executor,
            "race starting"
        );

        let mut participants: Vec<Box<dyn Participant>> = Vec::new();
        for &mode in &config.modes {
            participants.push(Box::new(Mutator {
                mode,
                table: config.table.clone(),
                count: config.ddl_count,
                store: Arc::clone(&self.primary),
                state: Arc::clone(&self.state),
                log: Arc::clone(&self.log),
                rng: StdRng::seed_from_u64(self.rng.random()),
                arrivals: barriers.mutator(),
            }));
        }
        for index in 0..config.dml_threads {
            participants.push(Box::new(Worker {
                executor: config.executor,
                index,
                table: config.table.clone(),
                schema: Arc::clone(&snapshot),
                rows: row_slice(total, config.dml_threads, index),
                batch: config.batch,
                unique_indexes,
                store: Arc::clone(&self.primary),
                log: Arc::clone(&self.log),
                rng: StdRng::seed_from_u64(self.rng.random()),
                arrivals: barriers.worker(),
            }));
        }
        // Handles are owned by the participants now.
        drop(barriers);

        let mut tasks = JoinSet::new();
        for participant in participants {
            tasks.spawn(participant.run());
        }

        let mut first_error = None;
        let mut durable = 0;
        let mut aborted = 0;
        while let Some(joined) = tasks.join_next().await {
            let error = match joined {
                Ok(Ok(report)) => {
                    tracing::debug!(
                        thread = %report.thread,
                        executed = report.executed,
                        tolerated = report.tolerated,
                        aborted = report.aborted,
                        "participant finished"
                    );
                    durable += report.durable_rows;
                    aborted += usize::from(report.aborted);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(e) => RoundError::Panicked(e.to_string()),
            };
            if first_error.is_none() {
                first_error = Some(error);
            } else {
                tracing::warn!("further participant error: {error}");
            }
        }
        if let Some(error) = first_error {
            return Err(error);
        }
        tracing::info!(durable, aborted, "race finished");
        Ok(durable)
    }

    /// Check the data the race left behind.
    async fn verify(&self, expected_rows: u64) -> Result<(), RoundError> {
        let table = &self.config.table;
        oracle::check_row_count(self.primary.as_ref(), table, expected_rows).await?;

        let Some(replica) = &self.replica else {
            oracle::check(self.primary.as_ref(), None, table).await?;
            return Ok(());
        };

        let checkpoint = self.config.checkpoint_table();
        let marker = i64::try_from(self.clock.now_micros()).unwrap_or(i64::MAX);
        let thread = self.log.register_thread("checkpoint")?;
        exec(
            self.primary.as_ref(),
            &thread,
            &Statement::Insert {
                table: checkpoint.clone(),
                columns: vec!["id".to_string()],
                rows: vec![vec![Value::Int(marker)]],
            },
        )
        .await?;
        oracle::wait_sync(replica.as_ref(), &checkpoint, marker, self.config.sync_poll)
            .await
            .map_err(|e| RoundError::store(thread.name(), format!("wait for marker {marker}"), e))?;
        tokio::time::sleep(self.config.sync_settle).await;
        oracle::check(self.primary.as_ref(), Some(replica.as_ref()), table).await?;
        Ok(())
    }
}
