use crate::error::{PipelineError, Result};
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Varchar,
    Double,
    Integer,
    Blob,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Owned dynamic value of a single attribute.
///
/// Mirrors SQLite's storage classes. Booleans are stored as `Integer` 0/1.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Check the value against a column type, widening integers stored in
    /// `Double` columns.
    pub(crate) fn conform(self, column: &ColumnSpec) -> Result<Value> {
        let expected = match column.column_type {
            ColumnType::Boolean => "boolean",
            ColumnType::Varchar => "text",
            ColumnType::Double => "real",
            ColumnType::Integer => "integer",
            ColumnType::Blob => "blob",
        };
        match (column.column_type, self) {
            (_, Value::Null) => Ok(Value::Null),
            (ColumnType::Boolean, Value::Integer(v)) if v == 0 || v == 1 => Ok(Value::Integer(v)),
            (ColumnType::Integer, v @ Value::Integer(_)) => Ok(v),
            (ColumnType::Double, v @ Value::Real(_)) => Ok(v),
            (ColumnType::Double, Value::Integer(v)) => Ok(Value::Real(v as f64)),
            (ColumnType::Varchar, v @ Value::Text(_)) => Ok(v),
            (ColumnType::Blob, v @ Value::Blob(_)) => Ok(v),
            (_, other) => Err(PipelineError::ValueTypeMismatch {
                column: column.name.clone(),
                expected,
                actual: other.type_name(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => Value::Blob(v.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnSpec, ColumnType, Value};
    use crate::error::PipelineError;

    #[test]
    fn conform_widens_integer_into_double() {
        let column = ColumnSpec::new("area", ColumnType::Double);
        let value = Value::Integer(3).conform(&column).expect("widened");
        assert_eq!(value, Value::Real(3.0));
    }

    #[test]
    fn conform_rejects_text_in_integer_column() {
        let column = ColumnSpec::new("code", ColumnType::Integer);
        let err = Value::from("12").conform(&column).expect_err("mismatch");
        match err {
            PipelineError::ValueTypeMismatch {
                column,
                expected,
                actual,
            } => {
                assert_eq!(column, "code");
                assert_eq!(expected, "integer");
                assert_eq!(actual, "text");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn conform_accepts_null_everywhere() {
        for column_type in [
            ColumnType::Boolean,
            ColumnType::Varchar,
            ColumnType::Double,
            ColumnType::Integer,
            ColumnType::Blob,
        ] {
            let column = ColumnSpec::new("c", column_type);
            assert_eq!(Value::Null.conform(&column).expect("null"), Value::Null);
        }
    }

    #[test]
    fn boolean_column_only_takes_zero_or_one() {
        let column = ColumnSpec::new("active", ColumnType::Boolean);
        assert_eq!(
            Value::from(true).conform(&column).expect("bool"),
            Value::Integer(1)
        );
        assert!(Value::Integer(2).conform(&column).is_err());
    }
}
