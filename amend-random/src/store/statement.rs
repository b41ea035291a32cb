//! Statements sent to a store.
//!
//! Statements are structured so the in-memory store can interpret them
//! directly; the SQL text comes from `Display` and is what the MySQL store
//! sends and what the execution log records.

use std::fmt;

use crate::schema::{Column, Schema};

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Render as a SQL literal.
    #[must_use]
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => format!("{v:?}"),
            Self::Text(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('\'');
                for ch in s.chars() {
                    match ch {
                        '\'' => out.push_str("''"),
                        '\\' => out.push_str("\\\\"),
                        _ => out.push(ch),
                    }
                }
                out.push('\'');
                out
            }
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_literal())
    }
}

/// A statement the tester can issue.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    DropDatabase {
        name: String,
    },
    CreateDatabase {
        name: String,
    },
    DropTable {
        table: String,
    },
    CreateTable {
        table: String,
        schema: Schema,
        clustered: bool,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// Update the row whose key columns equal `key`.
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        key: Vec<(String, Value)>,
    },
    AddColumn {
        table: String,
        column: Column,
    },
    DropColumn {
        table: String,
        column: String,
    },
    /// Redefine an existing column (type or length change).
    ModifyColumn {
        table: String,
        column: Column,
    },
    CreateIndex {
        table: String,
        name: String,
        columns: Vec<String>,
        unique: bool,
    },
    DropIndex {
        table: String,
        name: String,
    },
}

impl Statement {
    /// The table the statement touches, if any.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::DropDatabase { .. } | Self::CreateDatabase { .. } => None,
            Self::DropTable { table }
            | Self::CreateTable { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::ModifyColumn { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::DropIndex { table, .. } => Some(table),
        }
    }
}

fn join_pairs(pairs: &[(String, Value)], separator: &str) -> String {
    pairs
        .iter()
        .map(|(column, value)| format!("{column} = {value}"))
        .collect::<Vec<_>>()
        .join(separator)
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DropDatabase { name } => write!(f, "DROP DATABASE IF EXISTS {name}"),
            Self::CreateDatabase { name } => write!(f, "CREATE DATABASE {name}"),
            Self::DropTable { table } => f.write_str(&Schema::render_drop_table(table)),
            Self::CreateTable {
                table,
                schema,
                clustered,
            } => f.write_str(&schema.render_create_table(table, *clustered)),
            Self::Insert {
                table,
                columns,
                rows,
            } => {
                let rows: Vec<String> = rows
                    .iter()
                    .map(|row| {
                        let values: Vec<String> = row.iter().map(Value::to_sql_literal).collect();
                        format!("({})", values.join(", "))
                    })
                    .collect();
                write!(
                    f,
                    "INSERT INTO {table}({}) VALUES {}",
                    columns.join(", "),
                    rows.join(", ")
                )
            }
            Self::Update {
                table,
                assignments,
                key,
            } => write!(
                f,
                "UPDATE {table} SET {} WHERE {}",
                join_pairs(assignments, ", "),
                join_pairs(key, " AND ")
            ),
            Self::AddColumn { table, column } => {
                write!(f, "ALTER TABLE {table} ADD COLUMN {}", column.definition())
            }
            Self::DropColumn { table, column } => {
                write!(f, "ALTER TABLE {table} DROP COLUMN {column}")
            }
            Self::ModifyColumn { table, column } => {
                write!(f, "ALTER TABLE {table} MODIFY COLUMN {}", column.definition())
            }
            Self::CreateIndex {
                table,
                name,
                columns,
                unique,
            } => write!(
                f,
                "CREATE {}INDEX {name} ON {table}({})",
                if *unique { "UNIQUE " } else { "" },
                columns.join(", ")
            ),
            Self::DropIndex { table, name } => write!(f, "DROP INDEX {name} ON {table}"),
        }
    }
}
