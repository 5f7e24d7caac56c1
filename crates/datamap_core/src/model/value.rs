//! Generic field value shared by criteria, rows and bound parameters.
//!
//! # Responsibility
//! - Represent every value a data source can store or return.
//! - Provide one comparison/equality model used by in-memory filtering and
//!   ordering, mirroring SQLite's storage-class ordering.
//! - Convert to and from rusqlite bind/read values.
//!
//! # Invariants
//! - `Null` sorts before numbers, numbers before text, text before composites.
//! - `Integer` and `Real` compare numerically with each other.
//! - `Null` is never equal to anything, including another `Null`.

use crate::model::row::Row;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Dynamically typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    List(Vec<Value>),
    Map(Row),
}

impl Value {
    /// Builds a list value from anything convertible into values.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns whether this value is a list or a map.
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::List(_) | Self::Map(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Bool(value) => Some(i64::from(*value)),
            Self::Real(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_row(&self) -> Option<&Row> {
        match self {
            Self::Map(row) => Some(row),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// SQL-style equality: numeric across integer/real, `Null` equals nothing.
    pub fn sql_eq(&self, other: &Value) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        self.sql_cmp(other) == Ordering::Equal
    }

    /// Total ordering following SQLite storage classes.
    pub fn sql_cmp(&self, other: &Value) -> Ordering {
        let class_order = self.class_rank().cmp(&other.class_rank());
        if class_order != Ordering::Equal {
            return class_order;
        }

        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Text(left), Self::Text(right)) => left.cmp(right),
            (Self::List(left), Self::List(right)) => {
                for (l, r) in left.iter().zip(right) {
                    let ordering = l.sql_cmp(r);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                left.len().cmp(&right.len())
            }
            (Self::Map(left), Self::Map(right)) => left.len().cmp(&right.len()),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(left), Some(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            },
        }
    }

    /// Text rendering used by `LIKE` matching; `None` for null and composites.
    pub fn to_match_text(&self) -> Option<String> {
        match self {
            Self::Null | Self::List(_) | Self::Map(_) => None,
            Self::Bool(value) => Some(i64::from(*value).to_string()),
            Self::Integer(value) => Some(value.to_string()),
            Self::Real(value) => Some(value.to_string()),
            Self::Text(value) => Some(value.clone()),
        }
    }

    /// Normalized hashable key for grouping rows by value.
    ///
    /// Integral reals collapse onto integers so `1` and `1.0` share a key.
    /// Returns `None` for `Null`, which never joins with anything.
    pub fn index_key(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(value) => Some(format!("n:{}", i64::from(*value))),
            Self::Integer(value) => Some(format!("n:{value}")),
            Self::Real(value) if value.fract() == 0.0 && value.is_finite() => {
                Some(format!("n:{}", *value as i64))
            }
            Self::Real(value) => Some(format!("r:{value}")),
            Self::Text(value) => Some(format!("s:{value}")),
            Self::List(_) | Self::Map(_) => Some(format!("c:{self}")),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(value) => Some(f64::from(u8::from(*value))),
            Self::Integer(value) => Some(*value as f64),
            Self::Real(value) => Some(*value),
            _ => None,
        }
    }

    fn class_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) | Self::Integer(_) | Self::Real(_) => 1,
            Self::Text(_) => 2,
            Self::List(_) | Self::Map(_) => 3,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(row) => write!(f, "{row}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Row> for Value {
    fn from(value: Row) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::list(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            Self::Null => ToSqlOutput::from(rusqlite::types::Null),
            Self::Bool(value) => ToSqlOutput::from(i64::from(*value)),
            Self::Integer(value) => ToSqlOutput::from(*value),
            Self::Real(value) => ToSqlOutput::from(*value),
            Self::Text(value) => ToSqlOutput::from(value.as_str()),
            Self::List(_) | Self::Map(_) => {
                return Err(rusqlite::Error::ToSqlConversionFailure(
                    format!("cannot bind {} value as a SQL parameter", self.type_name()).into(),
                ));
            }
        };
        Ok(output)
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(value) => Self::Integer(value),
            ValueRef::Real(value) => Self::Real(value),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                Self::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Value;
    use std::cmp::Ordering;

    #[test]
    fn integer_and_real_compare_numerically() {
        assert!(Value::Integer(2).sql_eq(&Value::Real(2.0)));
        assert_eq!(
            Value::Integer(2).sql_cmp(&Value::Real(2.5)),
            Ordering::Less
        );
    }

    #[test]
    fn null_sorts_first_and_equals_nothing() {
        assert_eq!(Value::Null.sql_cmp(&Value::Integer(-10)), Ordering::Less);
        assert!(!Value::Null.sql_eq(&Value::Null));
    }

    #[test]
    fn numbers_sort_before_text() {
        assert_eq!(
            Value::Integer(1000).sql_cmp(&Value::from("1")),
            Ordering::Less
        );
    }

    #[test]
    fn index_key_collapses_integral_reals() {
        assert_eq!(Value::Real(7.0).index_key(), Value::Integer(7).index_key());
        assert_ne!(Value::from("7").index_key(), Value::Integer(7).index_key());
        assert_eq!(Value::Null.index_key(), None);
    }
}
