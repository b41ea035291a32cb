//! Per-round registry of the indexes planned on the table.
//!
//! DDL mutators plan concurrently before any DML starts. The registry is how
//! they avoid planning two unique indexes over the same column tuple, which
//! the target store would reject or, worse, silently accept as a duplicate
//! constraint. It also hands out index names.
//!
//! # Invariants
//!
//! - No two unique entries cover the same ordered column tuple
//! - Names are unique within a round
//! - `reset` returns the registry to its freshly created state

use std::collections::BTreeMap;
use std::fmt;

/// A registered index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Error returned when a registration would break an invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The name is already registered.
    DuplicateName(String),
    /// A unique index over the same column tuple already exists.
    DuplicateColumns { existing: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "index {name} is already registered"),
            Self::DuplicateColumns { existing } => {
                write!(f, "unique index {existing} already covers these columns")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Indexes registered for the current round.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    entries: BTreeMap<String, IndexEntry>,
    next_id: u32,
}

impl IndexRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an index.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::DuplicateName`] if `name` is taken
    /// - [`RegistryError::DuplicateColumns`] if `unique` and another unique
    ///   index already covers exactly `columns`, in that order
    pub fn register(
        &mut self,
        name: &str,
        columns: &[String],
        unique: bool,
    ) -> Result<(), RegistryError> {
        if self.entries.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        if unique {
            if let Some(existing) = self.unique_covering(columns) {
                return Err(RegistryError::DuplicateColumns {
                    existing: existing.to_string(),
                });
            }
        }
        self.entries.insert(
            name.to_string(),
            IndexEntry {
                columns: columns.to_vec(),
                unique,
            },
        );
        Ok(())
    }

    /// Name of the unique index covering exactly `columns`, if any.
    #[must_use]
    pub fn unique_covering(&self, columns: &[String]) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.unique && entry.columns == columns)
            .map(|(name, _)| name.as_str())
    }

    /// Whether any registered index uses `column`.
    #[must_use]
    pub fn indexes_column(&self, column: &str) -> bool {
        self.entries
            .values()
            .any(|entry| entry.columns.iter().any(|c| c == column))
    }

    /// Allocate a fresh index name with the given prefix.
    pub fn allocate_name(&mut self, prefix: &str) -> String {
        loop {
            let name = format!("{prefix}_{}", self.next_id);
            self.next_id += 1;
            if !self.entries.contains_key(&name) {
                return name;
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every index and restart name allocation.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.next_id = 0;
    }
}
