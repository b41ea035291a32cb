//! Column values for generated rows.
//!
//! Key values are a function of the row id, spread over the key columns in
//! mixed radix, so two workers with disjoint row ids never collide. Every
//! other value is random.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rand::Rng;

use crate::schema::{Column, DataType, Schema};
use crate::store::Value;

/// Origin of generated DATE and DATETIME values.
const ORIGIN: NaiveDateTime = match NaiveDate::from_ymd_opt(2000, 1, 1) {
    Some(date) => date.and_time(NaiveTime::MIN),
    None => unreachable!(),
};

/// How many distinct key values a column of this type gets.
const fn key_radix(data_type: DataType) -> u64 {
    match data_type {
        DataType::TinyInt => 127,
        DataType::SmallInt => 32_767,
        DataType::Date => 2_900_000,
        DataType::Timestamp => 1_000_000_000,
        DataType::Int => 2_147_483_647,
        DataType::DateTime => 6_000_000_000,
        DataType::Decimal => 9_999_999_999,
        DataType::BigInt | DataType::Double | DataType::Char | DataType::VarChar => 1 << 40,
    }
}

fn date_text(seconds_since_2000: i64, with_time: bool) -> String {
    let at = ORIGIN + TimeDelta::seconds(seconds_since_2000);
    let format = if with_time { "%Y-%m-%d %H:%M:%S" } else { "%Y-%m-%d" };
    at.format(format).to_string()
}

/// Value of a key column for digit `digit` of a row id.
#[allow(clippy::cast_possible_wrap)] // Digits are below every radix
fn key_value(data_type: DataType, digit: u64) -> Value {
    let digit = digit as i64;
    match data_type {
        DataType::TinyInt
        | DataType::SmallInt
        | DataType::Int
        | DataType::BigInt
        | DataType::Decimal => Value::Int(digit),
        #[allow(clippy::cast_precision_loss)] // Digits stay below 2^53
        DataType::Double => Value::Float(digit as f64),
        DataType::Char | DataType::VarChar => Value::Text(format!("k{digit}")),
        DataType::Date => Value::Text(date_text(digit * 86_400, false)),
        DataType::DateTime | DataType::Timestamp => Value::Text(date_text(digit, true)),
    }
}

/// Key values of row `row_id`, in key order.
#[must_use]
pub fn key_values(schema: &Schema, row_id: u64) -> Vec<(String, Value)> {
    let key: Vec<&Column> = schema.primary_key_columns().collect();
    let mut rest = row_id;
    let mut values = vec![Value::Null; key.len()];
    // The last key column is the least significant digit.
    for (slot, column) in values.iter_mut().zip(&key).rev() {
        let radix = key_radix(column.data_type);
        *slot = key_value(column.data_type, rest % radix);
        rest /= radix;
    }
    key.iter().map(|c| c.name.clone()).zip(values).collect()
}

/// A random value for a non-key column.
pub fn random_value<R: Rng + ?Sized>(column: &Column, rng: &mut R) -> Value {
    if column.nullable && rng.random_bool(0.2) {
        return Value::Null;
    }
    match column.data_type {
        DataType::TinyInt => Value::Int(rng.random_range(-128..=127)),
        DataType::SmallInt => Value::Int(rng.random_range(-32_768..=32_767)),
        DataType::Int => Value::Int(i64::from(rng.random::<i32>())),
        DataType::BigInt => Value::Int(rng.random()),
        DataType::Double => Value::Float(f64::from(rng.random_range(-1_000_000_i32..1_000_000)) / 100.0),
        DataType::Decimal => Value::Int(rng.random_range(-9_999_999_999..=9_999_999_999)),
        DataType::Char | DataType::VarChar => {
            let len = rng.random_range(1..=column.length.clamp(1, 16));
            Value::Text(
                (0..len)
                    .map(|_| char::from(rng.random_range(b'a'..=b'z')))
                    .collect(),
            )
        }
        DataType::Date => Value::Text(date_text(rng.random_range(0..20_000) * 86_400, false)),
        DataType::DateTime | DataType::Timestamp => {
            Value::Text(date_text(rng.random_range(0..1_000_000_000), true))
        }
    }
}

/// A full row: key values from `row_id`, random values elsewhere, in schema
/// column order.
pub fn row_values<R: Rng + ?Sized>(schema: &Schema, row_id: u64, rng: &mut R) -> Vec<Value> {
    let key = key_values(schema, row_id);
    schema
        .columns()
        .iter()
        .map(|column| {
            key.iter()
                .find(|(name, _)| *name == column.name)
                .map_or_else(|| random_value(column, rng), |(_, v)| v.clone())
        })
        .collect()
}
