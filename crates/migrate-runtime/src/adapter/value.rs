use chrono::{DateTime, NaiveDateTime};

use migrate_core::error::{MigrateError, Result};

/// A backend-neutral SQL value used for parameters and decoded columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One decoded result row, columns in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    /// Value of the first column.
    pub fn first(&self) -> Option<&Value> {
        self.columns.first().map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn try_i64(&self, column: &str) -> Result<i64> {
        match self.required(column)? {
            Value::Int(v) => Ok(*v),
            Value::Text(s) => s.trim().parse().map_err(|_| mismatch(column, "integer")),
            _ => Err(mismatch(column, "integer")),
        }
    }

    pub fn try_string(&self, column: &str) -> Result<String> {
        match self.required(column)? {
            Value::Text(s) => Ok(s.clone()),
            Value::Int(v) => Ok(v.to_string()),
            _ => Err(mismatch(column, "text")),
        }
    }

    pub fn try_opt_string(&self, column: &str) -> Result<Option<String>> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.try_string(column).map(Some),
        }
    }

    /// Timestamp column; text values (SQLite) are parsed.
    pub fn try_timestamp(&self, column: &str) -> Result<NaiveDateTime> {
        match self.required(column)? {
            Value::Timestamp(t) => Ok(*t),
            Value::Text(s) => parse_timestamp(s).ok_or_else(|| mismatch(column, "timestamp")),
            _ => Err(mismatch(column, "timestamp")),
        }
    }

    fn required(&self, column: &str) -> Result<&Value> {
        match self.get(column) {
            Some(Value::Null) | None => Err(MigrateError::SqlExecution(format!(
                "column '{}' is missing or NULL",
                column
            ))),
            Some(value) => Ok(value),
        }
    }
}

/// Rows and affected-row count of one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl QueryOutput {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
        }
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            rows_affected: 0,
        }
    }
}

fn mismatch(column: &str, expected: &str) -> MigrateError {
    MigrateError::SqlExecution(format!("column '{}' is not a valid {}", column, expected))
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|t| t.naive_utc()))
}
