//! Per-round record of every statement issued, for postmortem reproduction.
//!
//! Each participant of a round registers a thread name once and gets a
//! [`ThreadLog`] handle. Statements are appended when submitted and marked
//! done when the store returns, so a timed-out round shows exactly which
//! statements were still in flight.
//!
//! # Invariants
//!
//! - A thread name is registered at most once per log
//! - Entries of one thread are in submission order
//! - Start times never go backwards (see [`SystemTimeSource`](crate::time::SystemTimeSource))

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;

use crate::time::TimeSource;

/// Error type for execution log operations.
#[derive(Debug)]
pub enum LogError {
    /// The thread name is already registered.
    DuplicateThread(String),
    /// No thread with this name is registered.
    UnknownThread(String),
    /// The thread has no entry at this index.
    UnknownEntry { thread: String, index: usize },
    /// The thread map lock was poisoned.
    LockPoisoned,
    /// Writing the log file failed.
    Io(std::io::Error),
    /// Encoding the log failed.
    Serialize(serde_json::Error),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateThread(name) => write!(f, "thread {name} already registered"),
            Self::UnknownThread(name) => write!(f, "thread {name} not registered"),
            Self::UnknownEntry { thread, index } => {
                write!(f, "thread {thread} has no entry {index}")
            }
            Self::LockPoisoned => write!(f, "execution log lock poisoned"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Serialize(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serialize(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for LogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e)
    }
}

/// One submitted statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub statement: String,
    /// Submission time, microseconds since the Unix epoch.
    pub start_us: u64,
    /// Completion time; `None` while in flight.
    pub done_us: Option<u64>,
    pub error: Option<String>,
}

type Entries = Arc<Mutex<Vec<LogEntry>>>;

fn lock_entries(entries: &Mutex<Vec<LogEntry>>) -> MutexGuard<'_, Vec<LogEntry>> {
    // Entries are plain data, valid even after a panic mid-append.
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The execution log of one round.
pub struct ExecutionLog {
    round: u64,
    threads: RwLock<HashMap<String, Entries>>,
    clock: Arc<dyn TimeSource>,
}

impl fmt::Debug for ExecutionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionLog")
            .field("round", &self.round)
            .finish_non_exhaustive()
    }
}

/// Shape of the flushed artifact.
#[derive(Serialize)]
struct Artifact {
    round: u64,
    threads: BTreeMap<String, Vec<LogEntry>>,
}

impl ExecutionLog {
    #[must_use]
    pub fn new(round: u64, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            round,
            threads: RwLock::new(HashMap::new()),
            clock,
        }
    }

    #[must_use]
    pub const fn round(&self) -> u64 {
        self.round
    }

    /// Register a thread and return its append handle.
    ///
    /// # Errors
    ///
    /// - [`LogError::DuplicateThread`] if `name` is already registered
    /// - [`LogError::LockPoisoned`] if the thread map lock is poisoned
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn register_thread(&self, name: &str) -> Result<ThreadLog, LogError> {
        let mut threads = self.threads.write().map_err(|_| LogError::LockPoisoned)?;
        if threads.contains_key(name) {
            return Err(LogError::DuplicateThread(name.to_string()));
        }
        let entries: Entries = Arc::new(Mutex::new(Vec::new()));
        threads.insert(name.to_string(), Arc::clone(&entries));
        Ok(ThreadLog {
            name: name.to_string(),
            entries,
            clock: Arc::clone(&self.clock),
        })
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    fn entries_of(&self, thread: &str) -> Result<Entries, LogError> {
        let threads = self.threads.read().map_err(|_| LogError::LockPoisoned)?;
        threads
            .get(thread)
            .map(Arc::clone)
            .ok_or_else(|| LogError::UnknownThread(thread.to_string()))
    }

    /// Append a statement to `thread`, returning its index.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::UnknownThread`] if `thread` is not registered.
    pub fn begin_statement(&self, thread: &str, statement: &str) -> Result<usize, LogError> {
        let entries = self.entries_of(thread)?;
        Ok(append(&entries, self.clock.as_ref(), statement))
    }

    /// Mark entry `index` of `thread` done.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::UnknownThread`] or [`LogError::UnknownEntry`] if
    /// there is no such entry.
    pub fn complete_statement(
        &self,
        thread: &str,
        index: usize,
        error: Option<String>,
    ) -> Result<(), LogError> {
        let entries = self.entries_of(thread)?;
        if complete(&entries, self.clock.as_ref(), index, error) {
            Ok(())
        } else {
            Err(LogError::UnknownEntry {
                thread: thread.to_string(),
                index,
            })
        }
    }

    /// Copy of the entries of `thread`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::UnknownThread`] if `thread` is not registered.
    pub fn entries(&self, thread: &str) -> Result<Vec<LogEntry>, LogError> {
        let entries = self.entries_of(thread)?;
        let copy = lock_entries(&entries).clone();
        Ok(copy)
    }

    /// Registered thread names, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::LockPoisoned`] if the thread map lock is poisoned.
    pub fn thread_names(&self) -> Result<Vec<String>, LogError> {
        let threads = self.threads.read().map_err(|_| LogError::LockPoisoned)?;
        let mut names: Vec<String> = threads.keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }

    /// Write the log as JSON into `dir` and return the file path.
    ///
    /// The file is named `round-<round>-<crc32>.json`, the checksum taken
    /// over the content, so flushing the same log twice yields one file.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn flush(&self, dir: &Path) -> Result<PathBuf, LogError> {
        let threads = {
            let threads = self.threads.read().map_err(|_| LogError::LockPoisoned)?;
            threads
                .iter()
                .map(|(name, entries)| (name.clone(), lock_entries(entries).clone()))
                .collect()
        };
        let artifact = Artifact {
            round: self.round,
            threads,
        };
        let bytes = serde_json::to_vec_pretty(&artifact)?;
        let checksum = crc32fast::hash(&bytes);

        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("round-{}-{checksum:08x}.json", self.round));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

fn append(entries: &Mutex<Vec<LogEntry>>, clock: &dyn TimeSource, statement: &str) -> usize {
    let mut entries = lock_entries(entries);
    entries.push(LogEntry {
        statement: statement.to_string(),
        start_us: clock.now_micros(),
        done_us: None,
        error: None,
    });
    entries.len() - 1
}

fn complete(
    entries: &Mutex<Vec<LogEntry>>,
    clock: &dyn TimeSource,
    index: usize,
    error: Option<String>,
) -> bool {
    let mut entries = lock_entries(entries);
    let Some(entry) = entries.get_mut(index) else {
        return false;
    };
    entry.done_us = Some(clock.now_micros());
    entry.error = error;
    true
}

/// Append handle for one registered thread.
pub struct ThreadLog {
    name: String,
    entries: Entries,
    clock: Arc<dyn TimeSource>,
}

impl ThreadLog {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn begin(&self, statement: &str) -> usize {
        append(&self.entries, self.clock.as_ref(), statement)
    }

    pub fn complete(&self, index: usize, error: Option<String>) {
        if !complete(&self.entries, self.clock.as_ref(), index, error) {
            tracing::warn!(thread = %self.name, index, "completing unknown log entry");
        }
    }

    /// Log `statement`, await `op`, and record its outcome.
    pub async fn run<T, E, F>(&self, statement: &str, op: F) -> Result<T, E>
    where
        E: fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        tracing::debug!(thread = %self.name, statement, "submit");
        let index = self.begin(statement);
        let result = op.await;
        self.complete(index, result.as_ref().err().map(ToString::to_string));
        result
    }
}
