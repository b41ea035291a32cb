//! Table schema model.
//!
//! A round's table is described by an ordered list of [`Column`]s and the
//! names of its primary-key columns. The schema is pure data: generating it
//! only makes random choices and rendering only builds strings, so neither
//! can fail.
//!
//! Two copies exist while a round runs:
//!
//! - the *live* schema, which DDL mutators edit as they plan their changes
//! - the *snapshot* schema, cloned when DML workers start, which workers use
//!   to build their statements no matter what the mutators do afterwards
//!
//! The gap between the two is the race under test.

mod column;
mod generate;
mod registry;

pub use column::{Column, DataType};
pub use generate::{SchemaGenConfig, derive_primary_key, generate_schema};
pub use registry::{IndexEntry, IndexRegistry, RegistryError};

/// Columns and primary key of the table under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl Schema {
    /// Create a schema.
    ///
    /// # Pre-conditions
    ///
    /// - every name in `primary_key` names a column in `columns`
    /// - primary-key columns are not nullable
    #[must_use]
    pub const fn new(columns: Vec<Column>, primary_key: Vec<String>) -> Self {
        Self {
            columns,
            primary_key,
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// The primary-key columns, in key order.
    pub fn primary_key_columns(&self) -> impl Iterator<Item = &Column> {
        self.primary_key.iter().filter_map(|name| self.column(name))
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    #[must_use]
    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| k == name)
    }

    pub fn push_column(&mut self, column: Column) {
        self.columns.push(column);
    }

    /// Remove a non-key column. Key columns are never removed.
    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        if self.is_key_column(name) {
            return None;
        }
        let position = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(position))
    }

    /// Ordinal for the next added column. Dropped ordinals are not reused.
    #[must_use]
    pub fn next_ordinal(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.ordinal + 1)
            .max()
            .unwrap_or(0)
    }

    /// Deep copy handed to DML workers. Later edits to `self` are not
    /// visible through the returned value.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // The copy is the point
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Rough size of one row in bytes.
    #[must_use]
    pub fn estimated_row_bytes(&self) -> u64 {
        self.columns
            .iter()
            .map(|c| c.data_type.estimated_bytes(c.length))
            .sum::<u64>()
            .max(1)
    }

    /// Render `CREATE TABLE IF NOT EXISTS`.
    #[must_use]
    pub fn render_create_table(&self, table: &str, clustered: bool) -> String {
        let definitions: Vec<String> = self.columns.iter().map(Column::definition).collect();
        let mut out = format!("CREATE TABLE IF NOT EXISTS {table}(\n{}", definitions.join(",\n"));
        if !self.primary_key.is_empty() {
            out.push_str(&format!(",\nPRIMARY KEY({})", self.primary_key.join(", ")));
            if clustered {
                out.push_str(" CLUSTERED");
            }
        }
        out.push(')');
        out
    }

    /// Render `DROP TABLE IF EXISTS`.
    #[must_use]
    pub fn render_drop_table(table: &str) -> String {
        format!("DROP TABLE IF EXISTS {table}")
    }
}
