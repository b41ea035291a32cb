//! Column definitions.

use std::fmt;

/// SQL data types a generated column can take.
///
/// The set is limited to types that can take part in primary keys and
/// secondary indexes without prefix lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Double,
    Decimal,
    Char,
    VarChar,
    Date,
    DateTime,
    Timestamp,
}

impl DataType {
    /// All data types, in the order the generator draws from.
    pub const ALL: [Self; 11] = [
        Self::TinyInt,
        Self::SmallInt,
        Self::Int,
        Self::BigInt,
        Self::Double,
        Self::Decimal,
        Self::Char,
        Self::VarChar,
        Self::Date,
        Self::DateTime,
        Self::Timestamp,
    ];

    /// The SQL keyword for this type.
    #[must_use]
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::TinyInt => "TINYINT",
            Self::SmallInt => "SMALLINT",
            Self::Int => "INT",
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE",
            Self::Decimal => "DECIMAL",
            Self::Char => "CHAR",
            Self::VarChar => "VARCHAR",
            Self::Date => "DATE",
            Self::DateTime => "DATETIME",
            Self::Timestamp => "TIMESTAMP",
        }
    }

    /// Length a freshly generated column of this type gets; 0 means the
    /// type takes no length.
    #[must_use]
    pub const fn default_length(self) -> u32 {
        match self {
            Self::Char => 16,
            Self::VarChar => 64,
            _ => 0,
        }
    }

    /// Largest length the type accepts; 0 for types without a length.
    #[must_use]
    pub const fn max_length(self) -> u32 {
        match self {
            Self::Char => 255,
            Self::VarChar => 512,
            _ => 0,
        }
    }

    /// Rough storage cost of one value, used to size transactions.
    #[must_use]
    pub const fn estimated_bytes(self, length: u32) -> u64 {
        match self {
            Self::TinyInt => 1,
            Self::SmallInt => 2,
            Self::Int | Self::Date => 4,
            Self::BigInt | Self::Double | Self::DateTime | Self::Timestamp => 8,
            Self::Decimal => 16,
            Self::Char | Self::VarChar => length as u64,
        }
    }

    /// The next wider integer type, if there is one.
    #[must_use]
    pub const fn widened(self) -> Option<Self> {
        match self {
            Self::TinyInt => Some(Self::SmallInt),
            Self::SmallInt => Some(Self::Int),
            Self::Int => Some(Self::BigInt),
            _ => None,
        }
    }

    /// Whether the type carries a length that can be changed.
    #[must_use]
    pub const fn is_string(self) -> bool {
        matches!(self, Self::Char | Self::VarChar)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// One column of the table under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Position the column was created at. Names are derived from it and it
    /// never changes, even when earlier columns are dropped.
    pub ordinal: usize,
    pub name: String,
    pub data_type: DataType,
    /// 0 = unspecified.
    pub length: u32,
    pub nullable: bool,
}

impl Column {
    #[must_use]
    pub const fn new(
        ordinal: usize,
        name: String,
        data_type: DataType,
        length: u32,
        nullable: bool,
    ) -> Self {
        Self {
            ordinal,
            name,
            data_type,
            length,
            nullable,
        }
    }

    /// Create a column named `col_<ordinal>` with the type's default length.
    #[must_use]
    pub fn generated(ordinal: usize, data_type: DataType, nullable: bool) -> Self {
        Self::new(
            ordinal,
            format!("col_{ordinal}"),
            data_type,
            data_type.default_length(),
            nullable,
        )
    }

    /// Render the column as it appears in `CREATE TABLE` / `ALTER TABLE`.
    #[must_use]
    pub fn definition(&self) -> String {
        let mut out = if self.length > 0 {
            format!("{} {}({})", self.name, self.data_type, self.length)
        } else {
            format!("{} {}", self.name, self.data_type)
        };
        if !self.nullable {
            out.push_str(" NOT");
        }
        out.push_str(" NULL");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_with_length() {
        let column = Column::new(3, "col_3".to_string(), DataType::VarChar, 64, true);
        assert_eq!(column.definition(), "col_3 VARCHAR(64) NULL");
    }

    #[test]
    fn test_definition_not_null_without_length() {
        let column = Column::new(0, "col_0".to_string(), DataType::BigInt, 0, false);
        assert_eq!(column.definition(), "col_0 BIGINT NOT NULL");
    }

    #[test]
    fn test_generated_column_uses_default_length() {
        let column = Column::generated(7, DataType::Char, true);
        assert_eq!(column.name, "col_7");
        assert_eq!(column.length, 16);
    }

    #[test]
    fn test_widening_chain_ends_at_bigint() {
        let mut data_type = DataType::TinyInt;
        let mut steps = 0;
        while let Some(next) = data_type.widened() {
            data_type = next;
            steps += 1;
        }
        assert_eq!(data_type, DataType::BigInt);
        assert_eq!(steps, 3);
    }
}
