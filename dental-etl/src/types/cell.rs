use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// A single column value of a row read from the replication database.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    /// Exact decimal value kept in its textual form.
    Numeric(String),
    String(String),
    Bytes(Vec<u8>),
    /// Bit string made of `0` and `1` digits, most significant bit first.
    Bit(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Json(serde_json::Value),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Returns a short name of the value kind, used in conversion error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::I64(_) => "i64",
            Cell::U64(_) => "u64",
            Cell::F64(_) => "f64",
            Cell::Numeric(_) => "numeric",
            Cell::String(_) => "string",
            Cell::Bytes(_) => "bytes",
            Cell::Bit(_) => "bit",
            Cell::Date(_) => "date",
            Cell::Time(_) => "time",
            Cell::Timestamp(_) => "timestamp",
            Cell::Json(_) => "json",
        }
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl<T> From<Option<T>> for Cell
where
    T: Into<Cell>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}
