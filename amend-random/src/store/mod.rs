//! Access to the databases under test.
//!
//! The round logic only talks to the [`Store`] and [`Transaction`] traits:
//!
//! - [`MysqlStore`]: a MySQL-protocol server (TiDB in practice)
//! - [`MemoryStore`]: an in-process table model used by the tests, with
//!   latency, stall and connection-refusal injection and an asynchronous
//!   replica
//! - [`Retrying`]: a decorator that retries connection refusals with a fixed
//!   backoff
//!
//! Errors carry a structured [`StoreErrorKind`] so callers classify them
//! without matching on message text.

mod memory;
mod mysql;
mod retry;
mod statement;

use std::fmt;

use async_trait::async_trait;

pub use memory::{MemoryOptions, MemoryStats, MemoryStore, StallPoint};
pub use mysql::MysqlStore;
pub use retry::{RetryPolicy, Retrying};
pub use statement::{Statement, Value};

/// Classification of a store error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The server could not be reached. Retried by [`Retrying`].
    ConnectionRefused,
    /// The object being created already exists.
    AlreadyExists,
    /// The object being dropped or altered does not exist.
    MissingObject,
    /// The transaction was invalidated by a concurrent schema change.
    SchemaConflict,
    /// A unique constraint rejected the data.
    DuplicateKey,
    /// Anything else.
    Other,
}

impl StoreErrorKind {
    /// Whether a DDL statement failing this way is idempotent-retry noise
    /// rather than a bug.
    #[must_use]
    pub const fn is_benign_ddl(self) -> bool {
        matches!(self, Self::AlreadyExists | Self::MissingObject)
    }

    /// Whether a transaction ending this way is a legitimate outcome of
    /// racing any schema change. Duplicate keys are only legitimate in
    /// rounds that build unique indexes, which the caller decides.
    #[must_use]
    pub const fn is_expected_abort(self) -> bool {
        matches!(self, Self::SchemaConflict)
    }
}

/// Error returned by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    kind: StoreErrorKind,
    /// Server error code, when the store reports one.
    code: Option<u16>,
    message: String,
}

impl StoreError {
    #[must_use]
    pub fn new(kind: StoreErrorKind, code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::ConnectionRefused, None, message)
    }

    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Other, None, message)
    }

    #[must_use]
    pub const fn kind(&self) -> StoreErrorKind {
        self.kind
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "Error {code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for StoreError {}

/// Full contents of a table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSnapshot {
    /// Column names in table order. Empty when the store cannot tell (for
    /// example an empty result from a MySQL server).
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableSnapshot {
    /// Sort rows by their literal rendering so snapshots from different
    /// stores compare independent of scan order.
    pub fn sort_rows(&mut self) {
        self.rows.sort_by_cached_key(|row| {
            row.iter()
                .map(Value::to_sql_literal)
                .collect::<Vec<_>>()
        });
    }

    /// Position of a column by name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// A connection to a database under test.
#[async_trait]
pub trait Store: Send + Sync {
    /// Execute one statement in autocommit mode.
    async fn execute(&self, statement: &Statement) -> Result<(), StoreError>;

    /// Open a transaction on a dedicated connection.
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    /// Read every row of `table`.
    async fn fetch_rows(&self, table: &str) -> Result<TableSnapshot, StoreError>;

    /// Run the store's own consistency check of `table` (data against its
    /// indexes).
    async fn check_table(&self, table: &str) -> Result<(), StoreError>;

    /// Whether the checkpoint `table` holds a row with id `marker`.
    async fn has_marker(&self, table: &str, marker: i64) -> Result<bool, StoreError>;
}

/// An open transaction.
#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// SQL text logged for transaction control.
pub const BEGIN: &str = "BEGIN";
pub const COMMIT: &str = "COMMIT";
pub const ROLLBACK: &str = "ROLLBACK";
