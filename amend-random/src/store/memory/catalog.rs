//! Table model behind [`MemoryStore`](super::MemoryStore).
//!
//! Every schema change bumps a global schema version, and each column
//! remembers the version it was last defined at. A transaction records the
//! version it began at; at commit a write to a column that was dropped or
//! redefined since then is a schema conflict, while everything else is
//! amended onto the current schema (columns added since read as NULL).

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::schema::{Column, Schema};
use crate::store::{Statement, StoreError, StoreErrorKind, TableSnapshot, Value};

type Row = BTreeMap<String, Value>;

/// Name under which the primary key is kept among the indexes.
const PRIMARY: &str = "PRIMARY";

/// Column names per table, as a transaction saw them when it began.
pub type SchemaView = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone)]
struct Index {
    columns: Vec<String>,
    unique: bool,
}

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<Column>,
    column_versions: HashMap<String, u64>,
    primary_key: Vec<String>,
    indexes: BTreeMap<String, Index>,
    rows: Vec<Row>,
}

fn missing_table(table: &str) -> StoreError {
    StoreError::new(
        StoreErrorKind::MissingObject,
        Some(1146),
        format!("Table '{table}' doesn't exist"),
    )
}

fn unknown_column(column: &str) -> StoreError {
    StoreError::new(
        StoreErrorKind::Other,
        Some(1054),
        format!("Unknown column '{column}' in 'field list'"),
    )
}

fn not_null(column: &str) -> StoreError {
    StoreError::new(
        StoreErrorKind::Other,
        Some(1048),
        format!("Column '{column}' cannot be null"),
    )
}

fn schema_conflict() -> StoreError {
    StoreError::new(
        StoreErrorKind::SchemaConflict,
        Some(8028),
        "Information schema is changed during the execution of the statement",
    )
}

fn cant_drop(name: &str) -> StoreError {
    StoreError::new(
        StoreErrorKind::MissingObject,
        Some(1091),
        format!("Can't DROP '{name}'; check that column/key exists"),
    )
}

impl Table {
    fn new(schema: &Schema, version: u64) -> Self {
        let columns = schema.columns().to_vec();
        let column_versions = columns.iter().map(|c| (c.name.clone(), version)).collect();
        let primary_key = schema.primary_key().to_vec();
        let mut indexes = BTreeMap::new();
        if !primary_key.is_empty() {
            indexes.insert(
                PRIMARY.to_string(),
                Index {
                    columns: primary_key.clone(),
                    unique: true,
                },
            );
        }
        Self {
            columns,
            column_versions,
            primary_key,
            indexes,
            rows: Vec::new(),
        }
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn matches_key(row: &Row, key: &[(String, Value)]) -> bool {
        key.iter()
            .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
    }

    /// Check every unique index against the current rows. Tuples containing
    /// NULL never collide.
    fn validate_unique(&self) -> Result<(), StoreError> {
        for (name, index) in self.indexes.iter().filter(|(_, i)| i.unique) {
            let mut seen = HashSet::new();
            for row in &self.rows {
                let tuple: Vec<&Value> = index
                    .columns
                    .iter()
                    .map(|c| row.get(c).unwrap_or(&Value::Null))
                    .collect();
                if tuple.iter().any(|v| v.is_null()) {
                    continue;
                }
                let rendered: Vec<String> = tuple.iter().map(|v| v.to_sql_literal()).collect();
                if !seen.insert(rendered.clone()) {
                    return Err(StoreError::new(
                        StoreErrorKind::DuplicateKey,
                        Some(1062),
                        format!("Duplicate entry '{}' for key '{name}'", rendered.join("-")),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// All tables of one in-memory database.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    database_exists: bool,
    schema_version: u64,
    tables: BTreeMap<String, Table>,
}

impl Catalog {
    pub const fn schema_version(&self) -> u64 {
        self.schema_version
    }

    /// Column names of every table right now.
    pub fn view(&self) -> SchemaView {
        self.tables
            .iter()
            .map(|(name, table)| {
                (
                    name.clone(),
                    table.columns.iter().map(|c| c.name.clone()).collect(),
                )
            })
            .collect()
    }

    fn table(&self, name: &str) -> Result<&Table, StoreError> {
        self.tables.get(name).ok_or_else(|| missing_table(name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, StoreError> {
        self.tables.get_mut(name).ok_or_else(|| missing_table(name))
    }

    fn bump_version(&mut self) -> u64 {
        self.schema_version += 1;
        self.schema_version
    }

    /// Apply one statement in autocommit mode.
    pub fn apply(&mut self, statement: &Statement) -> Result<(), StoreError> {
        match statement {
            Statement::DropDatabase { .. } => {
                self.tables.clear();
                self.database_exists = false;
                self.bump_version();
            }
            Statement::CreateDatabase { name } => {
                if self.database_exists {
                    return Err(StoreError::new(
                        StoreErrorKind::AlreadyExists,
                        Some(1007),
                        format!("Can't create database '{name}'; database exists"),
                    ));
                }
                self.database_exists = true;
            }
            Statement::DropTable { table } => {
                if self.tables.remove(table).is_some() {
                    self.bump_version();
                }
            }
            Statement::CreateTable { table, schema, .. } => {
                if !self.tables.contains_key(table) {
                    let version = self.bump_version();
                    self.tables.insert(table.clone(), Table::new(schema, version));
                }
            }
            Statement::Insert { table, .. } | Statement::Update { table, .. } => {
                self.apply_write(statement, None)?;
                self.table(table)?.validate_unique()?;
            }
            Statement::AddColumn { table, column } => {
                if self.table(table)?.has_column(&column.name) {
                    return Err(StoreError::new(
                        StoreErrorKind::AlreadyExists,
                        Some(1060),
                        format!("Duplicate column name '{}'", column.name),
                    ));
                }
                let version = self.bump_version();
                let t = self.table_mut(table)?;
                t.columns.push(column.clone());
                t.column_versions.insert(column.name.clone(), version);
            }
            Statement::DropColumn { table, column } => {
                let t = self.table(table)?;
                if !t.has_column(column) {
                    return Err(cant_drop(column));
                }
                if t.primary_key.contains(column) {
                    return Err(StoreError::new(
                        StoreErrorKind::Other,
                        Some(8200),
                        format!("Unsupported drop primary key column '{column}'"),
                    ));
                }
                self.bump_version();
                let t = self.table_mut(table)?;
                t.columns.retain(|c| &c.name != column);
                t.column_versions.remove(column);
                for row in &mut t.rows {
                    row.remove(column);
                }
                for index in t.indexes.values_mut() {
                    index.columns.retain(|c| c != column);
                }
                t.indexes.retain(|_, index| !index.columns.is_empty());
            }
            Statement::ModifyColumn { table, column } => {
                if !self.table(table)?.has_column(&column.name) {
                    return Err(StoreError::new(
                        StoreErrorKind::MissingObject,
                        Some(1054),
                        format!("Unknown column '{}' in 'modify column'", column.name),
                    ));
                }
                let version = self.bump_version();
                let t = self.table_mut(table)?;
                for existing in &mut t.columns {
                    if existing.name == column.name {
                        *existing = column.clone();
                    }
                }
                t.column_versions.insert(column.name.clone(), version);
            }
            Statement::CreateIndex {
                table,
                name,
                columns,
                unique,
            } => {
                let t = self.table(table)?;
                if t.indexes.contains_key(name) {
                    return Err(StoreError::new(
                        StoreErrorKind::AlreadyExists,
                        Some(1061),
                        format!("Duplicate key name '{name}'"),
                    ));
                }
                if let Some(missing) = columns.iter().find(|c| !t.has_column(c)) {
                    return Err(StoreError::new(
                        StoreErrorKind::Other,
                        Some(1072),
                        format!("Key column '{missing}' doesn't exist in table"),
                    ));
                }
                let mut candidate = t.clone();
                candidate.indexes.insert(
                    name.clone(),
                    Index {
                        columns: columns.clone(),
                        unique: *unique,
                    },
                );
                candidate.validate_unique()?;
                self.bump_version();
                self.tables.insert(table.clone(), candidate);
            }
            Statement::DropIndex { table, name } => {
                if self.table_mut(table)?.indexes.remove(name).is_none() {
                    return Err(cant_drop(name));
                }
                self.bump_version();
            }
        }
        Ok(())
    }

    /// Apply an `INSERT` or `UPDATE`.
    ///
    /// With `begin_version` set the write comes from a transaction that
    /// began at that schema version, and writes to columns dropped or
    /// redefined since are schema conflicts. Unique indexes are not checked
    /// here; callers validate once all writes of a unit are applied.
    pub fn apply_write(
        &mut self,
        statement: &Statement,
        begin_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let (table, written): (&str, Vec<&String>) = match statement {
            Statement::Insert { table, columns, .. } => (table.as_str(), columns.iter().collect()),
            Statement::Update {
                table, assignments, ..
            } => (table.as_str(), assignments.iter().map(|(c, _)| c).collect()),
            _ => return Err(StoreError::other(format!("not a write: {statement}"))),
        };
        let t = self.table_mut(table)?;

        for column in written {
            match (t.column_versions.get(column.as_str()), begin_version) {
                (None, Some(_)) => return Err(schema_conflict()),
                (None, None) => return Err(unknown_column(column)),
                (Some(defined), Some(began)) if *defined > began => {
                    return Err(schema_conflict());
                }
                _ => {}
            }
        }

        match statement {
            Statement::Insert { columns, rows, .. } => {
                for values in rows {
                    if values.len() != columns.len() {
                        return Err(StoreError::new(
                            StoreErrorKind::Other,
                            Some(1136),
                            "Column count doesn't match value count",
                        ));
                    }
                    let row: Row = columns.iter().cloned().zip(values.iter().cloned()).collect();
                    if let Some(column) = t
                        .columns
                        .iter()
                        .find(|c| !c.nullable && row.get(&c.name).is_none_or(Value::is_null))
                    {
                        return Err(not_null(&column.name));
                    }
                    t.rows.push(row);
                }
            }
            Statement::Update {
                assignments, key, ..
            } => {
                if let Some((column, _)) = key.iter().find(|(c, _)| !t.has_column(c)) {
                    return Err(unknown_column(column));
                }
                for (column, value) in assignments {
                    let nullable = t.columns.iter().any(|c| &c.name == column && c.nullable);
                    if value.is_null() && !nullable {
                        return Err(not_null(column));
                    }
                }
                for row in t.rows.iter_mut().filter(|r| Table::matches_key(r, key)) {
                    for (column, value) in assignments {
                        row.insert(column.clone(), value.clone());
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Unique-index check for one table.
    pub fn validate_unique(&self, table: &str) -> Result<(), StoreError> {
        self.table(table)?.validate_unique()
    }

    /// Check a write against the schema a transaction began with.
    pub fn validate_write(view: &SchemaView, statement: &Statement) -> Result<(), StoreError> {
        let (table, referenced): (&str, Vec<&String>) = match statement {
            Statement::Insert {
                table,
                columns,
                rows,
            } => {
                if rows.iter().any(|r| r.len() != columns.len()) {
                    return Err(StoreError::new(
                        StoreErrorKind::Other,
                        Some(1136),
                        "Column count doesn't match value count",
                    ));
                }
                (table.as_str(), columns.iter().collect())
            }
            Statement::Update {
                table,
                assignments,
                key,
            } => (
                table.as_str(),
                assignments.iter().chain(key.iter()).map(|(c, _)| c).collect(),
            ),
            _ => {
                return Err(StoreError::other(format!(
                    "statement not allowed in a transaction: {statement}"
                )));
            }
        };
        let columns = view.get(table).ok_or_else(|| missing_table(table))?;
        if let Some(column) = referenced.into_iter().find(|c| !columns.contains(c)) {
            return Err(unknown_column(column));
        }
        Ok(())
    }

    pub fn snapshot(&self, table: &str) -> Result<TableSnapshot, StoreError> {
        let t = self.table(table)?;
        let columns: Vec<String> = t.columns.iter().map(|c| c.name.clone()).collect();
        let rows = t
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(TableSnapshot { columns, rows })
    }

    /// Check rows against the table definition and its unique indexes.
    pub fn check(&self, table: &str) -> Result<(), StoreError> {
        let t = self.table(table)?;
        for (position, row) in t.rows.iter().enumerate() {
            if let Some(extra) = row.keys().find(|k| !t.has_column(k)) {
                return Err(StoreError::other(format!(
                    "row {position} of {table} holds a value for unknown column {extra}"
                )));
            }
            if let Some(column) = t
                .columns
                .iter()
                .find(|c| !c.nullable && row.get(&c.name).is_none_or(Value::is_null))
            {
                return Err(StoreError::other(format!(
                    "row {position} of {table} has NULL in NOT NULL column {}",
                    column.name
                )));
            }
        }
        t.validate_unique()
            .map_err(|e| StoreError::other(format!("index of {table} inconsistent: {e}")))
    }

    pub fn has_marker(&self, table: &str, marker: i64) -> Result<bool, StoreError> {
        let t = self.table(table)?;
        Ok(t.rows
            .iter()
            .any(|row| row.values().any(|v| *v == Value::Int(marker))))
    }
}
