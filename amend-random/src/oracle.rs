//! Post-round consistency checks.
//!
//! With a replica configured the table is compared row by row between the
//! two stores, once the replica has caught up with a checkpoint marker.
//! Without one, the primary runs its own integrity check.

use std::fmt;
use std::time::Duration;

use futures::future::try_join;

use crate::store::{Store, StoreError, StoreErrorKind, TableSnapshot, Value};

/// A consistency check that did not pass.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckError {
    Store(StoreError),
    ColumnMismatch {
        primary: Vec<String>,
        replica: Vec<String>,
    },
    RowCountMismatch {
        primary: usize,
        replica: usize,
    },
    /// First differing row after sorting.
    RowMismatch {
        position: usize,
        primary: String,
        replica: String,
    },
    /// The primary holds a different number of rows than the committed
    /// transactions wrote.
    ExpectedRows {
        expected: u64,
        actual: u64,
    },
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "check failed: {e}"),
            Self::ColumnMismatch { primary, replica } => write!(
                f,
                "columns differ: [{}] vs [{}]",
                primary.join(", "),
                replica.join(", ")
            ),
            Self::RowCountMismatch { primary, replica } => {
                write!(f, "row count differs: {primary} vs {replica}")
            }
            Self::RowMismatch {
                position,
                primary,
                replica,
            } => write!(f, "row {position} differs: ({primary}) vs ({replica})"),
            Self::ExpectedRows { expected, actual } => {
                write!(f, "expected {expected} committed rows, found {actual}")
            }
        }
    }
}

impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for CheckError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

fn render(row: &[Value]) -> String {
    row.iter()
        .map(Value::to_sql_literal)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compare two snapshots, ignoring row order. Column lists are only
/// compared when both stores reported them.
///
/// # Errors
///
/// Returns the first difference found.
pub fn compare(mut primary: TableSnapshot, mut replica: TableSnapshot) -> Result<(), CheckError> {
    if !primary.columns.is_empty()
        && !replica.columns.is_empty()
        && primary.columns != replica.columns
    {
        return Err(CheckError::ColumnMismatch {
            primary: primary.columns,
            replica: replica.columns,
        });
    }
    if primary.rows.len() != replica.rows.len() {
        return Err(CheckError::RowCountMismatch {
            primary: primary.rows.len(),
            replica: replica.rows.len(),
        });
    }
    primary.sort_rows();
    replica.sort_rows();
    for (position, (a, b)) in primary.rows.iter().zip(&replica.rows).enumerate() {
        let (a, b) = (render(a), render(b));
        if a != b {
            return Err(CheckError::RowMismatch {
                position,
                primary: a,
                replica: b,
            });
        }
    }
    Ok(())
}

/// Check `table`: against `replica` when given, otherwise with the
/// primary's own integrity check.
///
/// # Errors
///
/// Returns a [`CheckError`] describing the inconsistency, or the store
/// error that prevented the check.
pub async fn check(
    primary: &dyn Store,
    replica: Option<&dyn Store>,
    table: &str,
) -> Result<(), CheckError> {
    let Some(replica) = replica else {
        primary.check_table(table).await?;
        return Ok(());
    };
    let (a, b) = try_join(primary.fetch_rows(table), replica.fetch_rows(table)).await?;
    tracing::debug!(table, rows = a.rows.len(), "comparing snapshots");
    compare(a, b)
}

/// Check that `table` on `store` holds exactly `expected` rows.
///
/// # Errors
///
/// Returns [`CheckError::ExpectedRows`] on a mismatch.
pub async fn check_row_count(store: &dyn Store, table: &str, expected: u64) -> Result<(), CheckError> {
    let actual = store.fetch_rows(table).await?.rows.len() as u64;
    if actual != expected {
        return Err(CheckError::ExpectedRows { expected, actual });
    }
    Ok(())
}

/// Wait until `store` sees `marker` in `checkpoint_table`, polling every
/// `poll`. A missing table only means replication has not got that far.
///
/// There is no deadline here; the round deadline bounds the wait.
///
/// # Errors
///
/// Returns any store error other than a missing object.
pub async fn wait_sync(
    store: &dyn Store,
    checkpoint_table: &str,
    marker: i64,
    poll: Duration,
) -> Result<(), StoreError> {
    let mut polls = 0u64;
    loop {
        match store.has_marker(checkpoint_table, marker).await {
            Ok(true) => {
                tracing::debug!(marker, polls, "replica caught up");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) if e.kind() == StoreErrorKind::MissingObject => {}
            Err(e) => return Err(e),
        }
        polls += 1;
        tokio::time::sleep(poll).await;
    }
}
