//! Result rows and typed extraction.

use bulk_triggers_core::{TriggerError, TriggerResult};

use crate::value::Value;

/// One result row: column names paired with values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a row. Extra columns or values beyond the shorter list are dropped.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        let n = columns.len().min(values.len());
        let mut columns = columns;
        let mut values = values;
        columns.truncate(n);
        values.truncate(n);
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the column is missing and `TypeError` if the
    /// value cannot be converted.
    pub fn get<T: FromValue>(&self, column: &str) -> TriggerResult<T> {
        let value = self.get_value(column).ok_or_else(|| {
            TriggerError::DatabaseError(format!("Column '{column}' not found in row"))
        })?;
        T::from_value(value)
    }

    /// Gets a typed value by position.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> TriggerResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            TriggerError::DatabaseError(format!(
                "Column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Returns the raw value of a column.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Iterates over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Consumes the row into `(column, value)` pairs.
    pub fn into_pairs(self) -> Vec<(String, Value)> {
        self.columns.into_iter().zip(self.values).collect()
    }
}

/// Conversion from a [`Value`] cell to a Rust type.
pub trait FromValue: Sized {
    /// Attempts the conversion.
    fn from_value(value: &Value) -> TriggerResult<Self>;
}

fn mismatch(expected: &str, value: &Value) -> TriggerError {
    TriggerError::TypeError(format!("Expected {expected}, got {}", value.type_name()))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> TriggerResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> TriggerResult<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(Self::from(*b)),
            other => Err(mismatch("int", other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> TriggerResult<Self> {
        let wide = i64::from_value(value)?;
        Self::try_from(wide)
            .map_err(|_| TriggerError::ValueError(format!("{wide} does not fit in i32")))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> TriggerResult<Self> {
        value.as_f64().ok_or_else(|| mismatch("float", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> TriggerResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> TriggerResult<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(mismatch("string", other)),
        }
    }
}

impl FromValue for uuid::Uuid {
    fn from_value(value: &Value) -> TriggerResult<Self> {
        match value {
            Value::Uuid(u) => Ok(*u),
            Value::String(s) => Self::parse_str(s)
                .map_err(|e| TriggerError::ValueError(format!("Invalid UUID '{s}': {e}"))),
            other => Err(mismatch("uuid", other)),
        }
    }
}

impl FromValue for chrono::DateTime<chrono::Utc> {
    fn from_value(value: &Value) -> TriggerResult<Self> {
        match value {
            Value::DateTimeTz(dt) => Ok(*dt),
            Value::DateTime(naive) => Ok(naive.and_utc()),
            Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .or_else(|_| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                        .map(|naive| naive.and_utc())
                })
                .map_err(|e| TriggerError::ValueError(format!("Invalid datetime '{s}': {e}"))),
            other => Err(mismatch("datetime", other)),
        }
    }
}

impl FromValue for chrono::NaiveDate {
    fn from_value(value: &Value) -> TriggerResult<Self> {
        match value {
            Value::Date(d) => Ok(*d),
            Value::String(s) => Self::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| TriggerError::ValueError(format!("Invalid date '{s}': {e}"))),
            other => Err(mismatch("date", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> TriggerResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
