//! Command-line configuration.
//!
//! `Cli` is the raw clap surface; [`RunConfig::from_cli`] validates it into
//! the configuration the driver runs with.
//!
//! # Invariants
//!
//! - `database` is non-empty and taken from the path of `dsn1`
//! - `modes` holds no duplicates
//! - `dml_threads` is at least 1

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use mysql_async::Opts;

use crate::ddl::{DdlMode, UnknownModeError};
use crate::dml::{DmlExecutor, UnknownExecutorError};
use crate::schema::Schema;

/// Race schema changes against open transactions.
#[derive(Parser, Debug, Clone)]
#[command(name = "amend-random")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Schema changes each DDL mode plans per round.
    #[arg(long, default_value_t = RunConfig::DEFAULT_DDL_COUNT)]
    pub ddl_count: usize,

    /// Rows written per round, split across the DML threads.
    #[arg(long, default_value_t = RunConfig::DEFAULT_DML_COUNT)]
    pub dml_count: u64,

    /// Concurrent DML transactions per round.
    #[arg(long = "dml-thread", default_value_t = RunConfig::DEFAULT_DML_THREADS)]
    pub dml_thread: usize,

    /// Rows per INSERT statement; 0 puts all of a thread's rows in one.
    #[arg(long, default_value_t = RunConfig::DEFAULT_BATCH)]
    pub batch: usize,

    /// Database under test.
    #[arg(long, default_value = RunConfig::DEFAULT_DSN1)]
    pub dsn1: String,

    /// Replica to cross-check against; empty for none.
    #[arg(long, default_value = "")]
    pub dsn2: String,

    /// Comma-separated DDL modes.
    #[arg(long, default_value = "")]
    pub mode: String,

    /// DML transaction shape: update-conflict or insert-update.
    #[arg(long, default_value = RunConfig::DEFAULT_EXECUTOR)]
    pub executor: String,

    /// Table the rounds run against.
    #[arg(long, default_value = RunConfig::DEFAULT_TABLE)]
    pub tablename: String,

    /// Only compare the table between dsn1 and dsn2, then exit.
    #[arg(long)]
    pub checkonly: bool,

    /// Target transaction size, e.g. 100M or 1G. Overrides dml-count.
    #[arg(long)]
    pub txn_size: Option<String>,

    /// Rounds to run; 0 runs until a failure stops it.
    #[arg(long, default_value_t = 0)]
    pub round: u64,

    /// Deadline of a single round, e.g. 10m or 90s.
    #[arg(long, default_value = "10m")]
    pub timeout: String,

    /// Stop at the first failed round.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub failfast: bool,

    /// Keep going after a round times out.
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub continue_on_timeout: bool,

    /// Create the table with a clustered primary key.
    #[arg(long)]
    pub clustered_index: bool,

    /// Seed for every random choice; random when omitted.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Where execution logs of failed rounds are written.
    #[arg(long, default_value = RunConfig::DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,

    /// Wait after the replica caught up, before comparing.
    #[arg(long, default_value = "10s")]
    pub sync_settle: String,

    /// Interval between replica catch-up polls.
    #[arg(long, default_value = "1s")]
    pub sync_poll: String,
}

/// Error returned when the command line is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownMode(String),
    UnknownExecutor(String),
    InvalidDsn { dsn: String, message: String },
    InvalidSize(String),
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownMode(mode) => write!(f, "mode {mode} not supported"),
            Self::UnknownExecutor(name) => write!(f, "invalid dml executor name `{name}`"),
            Self::InvalidDsn { dsn, message } => write!(f, "invalid dsn {dsn}: {message}"),
            Self::InvalidSize(value) => write!(f, "invalid size {value}"),
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<UnknownModeError> for ConfigError {
    fn from(e: UnknownModeError) -> Self {
        Self::UnknownMode(e.0)
    }
}

impl From<UnknownExecutorError> for ConfigError {
    fn from(e: UnknownExecutorError) -> Self {
        Self::UnknownExecutor(e.0)
    }
}

/// Validated run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub ddl_count: usize,
    pub dml_count: u64,
    pub dml_threads: usize,
    pub batch: usize,
    pub dsn1: String,
    pub dsn2: Option<String>,
    /// Database the rounds recreate, from the path of `dsn1`.
    pub database: String,
    pub modes: Vec<DdlMode>,
    pub executor: DmlExecutor,
    pub table: String,
    pub check_only: bool,
    /// Target transaction size in bytes.
    pub txn_size: Option<u64>,
    /// Rounds to run; 0 for unbounded.
    pub rounds: u64,
    pub timeout: Duration,
    pub failfast: bool,
    pub continue_on_timeout: bool,
    pub clustered_index: bool,
    pub seed: u64,
    pub log_dir: PathBuf,
    pub sync_settle: Duration,
    pub sync_poll: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ddl_count: Self::DEFAULT_DDL_COUNT,
            dml_count: Self::DEFAULT_DML_COUNT,
            dml_threads: Self::DEFAULT_DML_THREADS,
            batch: Self::DEFAULT_BATCH,
            dsn1: Self::DEFAULT_DSN1.to_string(),
            dsn2: None,
            database: "test".to_string(),
            modes: Vec::new(),
            executor: DmlExecutor::UpdateConflict,
            table: Self::DEFAULT_TABLE.to_string(),
            check_only: false,
            txn_size: None,
            rounds: 0,
            timeout: Duration::from_secs(600),
            failfast: true,
            continue_on_timeout: false,
            clustered_index: false,
            seed: 0,
            log_dir: PathBuf::from(Self::DEFAULT_LOG_DIR),
            sync_settle: Duration::from_secs(10),
            sync_poll: Duration::from_secs(1),
        }
    }
}

impl RunConfig {
    pub const DEFAULT_DDL_COUNT: usize = 10;
    pub const DEFAULT_DML_COUNT: u64 = 10;
    pub const DEFAULT_DML_THREADS: usize = 20;
    pub const DEFAULT_BATCH: usize = 10;
    pub const DEFAULT_DSN1: &'static str = "mysql://root@127.0.0.1:4000/test";
    pub const DEFAULT_EXECUTOR: &'static str = "update-conflict";
    pub const DEFAULT_TABLE: &'static str = "t";
    pub const DEFAULT_LOG_DIR: &'static str = "./log";
    /// Transactions at least this large get wide tables.
    pub const LARGE_TXN_BYTES: u64 = 200 << 20;

    /// Validate the command line.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown modes or executors, DSNs that do not
    /// parse or name no database, and malformed sizes or durations.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let database = database_of(&cli.dsn1)?;
        let dsn2 = if cli.dsn2.is_empty() {
            None
        } else {
            database_of(&cli.dsn2)?;
            Some(cli.dsn2)
        };
        if cli.dml_thread == 0 {
            return Err(ConfigError::InvalidValue {
                name: "dml-thread".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let txn_size = cli.txn_size.as_deref().map(parse_size).transpose()?;

        Ok(Self {
            ddl_count: cli.ddl_count,
            dml_count: cli.dml_count,
            dml_threads: cli.dml_thread,
            batch: cli.batch,
            dsn1: cli.dsn1,
            dsn2,
            database,
            modes: DdlMode::parse_list(&cli.mode)?,
            executor: cli.executor.parse()?,
            table: cli.tablename,
            check_only: cli.checkonly,
            txn_size,
            rounds: cli.round,
            timeout: parse_duration("timeout", &cli.timeout)?,
            failfast: cli.failfast,
            continue_on_timeout: cli.continue_on_timeout,
            clustered_index: cli.clustered_index,
            seed: cli.seed.unwrap_or_else(rand::random),
            log_dir: cli.log_dir,
            sync_settle: parse_duration("sync-settle", &cli.sync_settle)?,
            sync_poll: parse_duration("sync-poll", &cli.sync_poll)?,
        })
    }

    /// Name of the table holding replication checkpoints.
    #[must_use]
    pub fn checkpoint_table(&self) -> String {
        format!("check_point_{}", self.table)
    }

    /// Fewest columns a generated schema gets.
    #[must_use]
    pub fn min_columns(&self) -> usize {
        match self.txn_size {
            Some(size) if size >= Self::LARGE_TXN_BYTES => 100,
            _ => 10,
        }
    }

    /// Rows to write for `schema`: `dml_count`, or in transaction-size mode
    /// as many as make up `txn_size`. Batching changes how the rows are
    /// grouped into statements, not how many there are.
    #[must_use]
    pub fn dml_count_for(&self, schema: &Schema) -> u64 {
        match self.txn_size {
            Some(size) => (size / schema.estimated_row_bytes()).max(1),
            None => self.dml_count,
        }
    }
}

fn database_of(dsn: &str) -> Result<String, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidDsn {
        dsn: dsn.to_string(),
        message,
    };
    let opts = Opts::from_url(dsn).map_err(|e| invalid(e.to_string()))?;
    opts.db_name()
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| invalid("no database name".to_string()))
}

/// Parse a human-readable size such as `512`, `100M`, `1.5GiB`. Units are
/// binary and case-insensitive.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidSize`] if the value does not parse.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)] // Range checked before the final cast
pub fn parse_size(value: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidSize(value.to_string());
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let number: f64 = number.parse().map_err(|_| invalid())?;
    let unit = unit.trim().to_ascii_lowercase();
    let unit = unit
        .strip_suffix("ib")
        .or_else(|| unit.strip_suffix('b'))
        .unwrap_or(&unit);
    let shift = match unit {
        "" => 0,
        "k" => 10,
        "m" => 20,
        "g" => 30,
        "t" => 40,
        "p" => 50,
        _ => return Err(invalid()),
    };
    let bytes = number * (1u64 << shift) as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}

/// Parse a duration such as `10m`, `1h 30m` or `250ms`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] naming `name` if the value does
/// not parse.
pub fn parse_duration(name: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!("'{value}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, DataType};

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["amend-random"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::from_cli(cli(&[])).unwrap();
        assert_eq!(config.ddl_count, 10);
        assert_eq!(config.dml_threads, 20);
        assert_eq!(config.database, "test");
        assert_eq!(config.dsn2, None);
        assert!(config.modes.is_empty());
        assert_eq!(config.executor, DmlExecutor::UpdateConflict);
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert!(config.failfast);
        assert!(!config.continue_on_timeout);
        assert_eq!(config.checkpoint_table(), "check_point_t");
        assert_eq!(config.min_columns(), 10);
    }

    #[test]
    fn test_flags() {
        let config = RunConfig::from_cli(cli(&[
            "--mode",
            "add-column,drop-index",
            "--executor",
            "insert-update",
            "--failfast",
            "false",
            "--dsn2",
            "mysql://root@127.0.0.1:3306/test",
            "--txn-size",
            "300M",
            "--seed",
            "42",
        ]))
        .unwrap();
        assert_eq!(config.modes, vec![DdlMode::AddColumn, DdlMode::DropIndex]);
        assert_eq!(config.executor, DmlExecutor::InsertUpdate);
        assert!(!config.failfast);
        assert!(config.dsn2.is_some());
        assert_eq!(config.txn_size, Some(300 << 20));
        assert_eq!(config.min_columns(), 100);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert_eq!(
            RunConfig::from_cli(cli(&["--mode", "truncate"])).unwrap_err(),
            ConfigError::UnknownMode("truncate".to_string())
        );
        assert_eq!(
            RunConfig::from_cli(cli(&["--executor", "x"])).unwrap_err(),
            ConfigError::UnknownExecutor("x".to_string())
        );
        assert!(matches!(
            RunConfig::from_cli(cli(&["--dsn1", "mysql://root@127.0.0.1:4000"])),
            Err(ConfigError::InvalidDsn { .. })
        ));
        assert!(matches!(
            RunConfig::from_cli(cli(&["--txn-size", "10Q"])),
            Err(ConfigError::InvalidSize(_))
        ));
        assert!(matches!(
            RunConfig::from_cli(cli(&["--dml-thread", "0"])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("1k").unwrap(), 1024);
        assert_eq!(parse_size("100M").unwrap(), 100 << 20);
        assert_eq!(parse_size("1.5GiB").unwrap(), 3 << 29);
        assert_eq!(parse_size("2gb").unwrap(), 2 << 30);
        assert!(parse_size("").is_err());
        assert!(parse_size("M").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("t", "10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("t", "1h30m").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration("t", "250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("t", "2min 5s").unwrap(), Duration::from_secs(125));
        assert!(parse_duration("t", "10").is_err());
        assert!(parse_duration("t", "5x").is_err());
        assert!(matches!(
            RunConfig::from_cli(cli(&["--sync-poll", "soon"])),
            Err(ConfigError::InvalidValue { name, .. }) if name == "sync-poll"
        ));
    }

    #[test]
    fn test_dml_count_from_txn_size() {
        let schema = Schema::new(
            vec![Column::new(0, "col_0".to_string(), DataType::BigInt, 0, false)],
            vec!["col_0".to_string()],
        );
        let mut config = RunConfig::default();
        assert_eq!(config.dml_count_for(&schema), 10);

        let row_bytes = schema.estimated_row_bytes();
        assert_eq!(row_bytes, 8);
        config.txn_size = Some(8_000);
        for batch in [0, 1, 10] {
            config.batch = batch;
            let rows = config.dml_count_for(&schema);
            assert_eq!(rows * row_bytes, 8_000, "batch {batch}");
        }

        config.txn_size = Some(1);
        assert_eq!(config.dml_count_for(&schema), 1);
    }
}
