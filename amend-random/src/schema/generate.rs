//! Random schema generation.

use rand::Rng;

use super::{Column, DataType, Schema};

/// Bounds for the number of generated columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaGenConfig {
    /// Smallest column count drawn.
    pub column_least: usize,
    /// Largest column count drawn.
    pub column_most: usize,
}

impl Default for SchemaGenConfig {
    fn default() -> Self {
        Self {
            column_least: 2,
            column_most: 200,
        }
    }
}

/// Generate a random schema with at least `min_columns` columns.
///
/// The column count is drawn from `[column_least, column_most]` and raised to
/// `min_columns`. Every column gets a random type and nullability, then the
/// primary key is derived with [`derive_primary_key`].
///
/// Given the same RNG state the result is identical.
pub fn generate_schema<R: Rng + ?Sized>(
    rng: &mut R,
    config: &SchemaGenConfig,
    min_columns: usize,
) -> Schema {
    let least = config.column_least.max(1);
    let most = config.column_most.max(least);
    let count = rng.random_range(least..=most).max(min_columns).max(1);

    let mut columns: Vec<Column> = (0..count)
        .map(|i| {
            let data_type = DataType::ALL[rng.random_range(0..DataType::ALL.len())];
            Column::generated(i, data_type, rng.random_bool(0.5))
        })
        .collect();
    let primary_key = derive_primary_key(&mut columns);
    Schema::new(columns, primary_key)
}

/// Pick the primary key and mark its columns `NOT NULL`.
///
/// Column 0 always starts the key. The column at position `p` joins while
/// `p <= 2`, or while the column before it is a `TINYINT` (a key prefix that
/// small cannot keep enough rows apart on its own). The first position that
/// satisfies neither ends the key.
pub fn derive_primary_key(columns: &mut [Column]) -> Vec<String> {
    let mut key = Vec::new();
    let Some(first) = columns.first_mut() else {
        return key;
    };
    first.nullable = false;
    key.push(first.name.clone());

    let mut position = 1;
    while position < columns.len()
        && (position <= 2 || columns[position - 1].data_type == DataType::TinyInt)
    {
        columns[position].nullable = false;
        key.push(columns[position].name.clone());
        position += 1;
    }
    key
}
