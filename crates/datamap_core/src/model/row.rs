//! Order-preserving row structure and result sets.
//!
//! # Responsibility
//! - Hold field/value pairs in insertion order with unique field names.
//! - Nest joined-table columns and resolved relations as sub-rows.
//!
//! # Invariants
//! - A field name appears at most once; re-inserting replaces in place.
//! - Serialization preserves field order.

use crate::model::value::Value;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// Generic field -> value mapping returned by reads and accepted by writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.position(field).is_some()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.position(field).map(|index| &self.entries[index].1)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.position(field).map(|index| &mut self.entries[index].1)
    }

    /// Resolves `field`, falling back to a `table.column` path into a
    /// nested sub-row when no top-level field carries the exact name.
    pub fn lookup(&self, field: &str) -> Option<&Value> {
        if let Some(value) = self.get(field) {
            return Some(value);
        }
        let (table, column) = field.split_once('.')?;
        self.get(table)?.as_row()?.lookup(column)
    }

    /// Inserts or replaces a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let field = field.into();
        let value = value.into();
        match self.position(&field) {
            Some(index) => Some(std::mem::replace(&mut self.entries[index].1, value)),
            None => {
                self.entries.push((field, value));
                None
            }
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        let index = self.position(field)?;
        Some(self.entries.remove(index).1)
    }

    /// Returns the nested sub-row under `field`, creating it when absent.
    pub fn sub_row_mut(&mut self, field: &str) -> &mut Row {
        let index = match self.position(field) {
            Some(index) => {
                if !matches!(self.entries[index].1, Value::Map(_)) {
                    self.entries[index].1 = Value::Map(Row::new());
                }
                index
            }
            None => {
                self.entries.push((field.to_string(), Value::Map(Row::new())));
                self.entries.len() - 1
            }
        };
        match &mut self.entries[index].1 {
            Value::Map(row) => row,
            _ => unreachable!("entry was normalized to a map above"),
        }
    }

    /// Copies every field of `other` into this row, replacing duplicates.
    pub fn merge(&mut self, other: &Row) {
        for (field, value) in other.iter() {
            self.insert(field, value.clone());
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(field, _)| field.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .map(|(field, value)| (field.as_str(), value))
    }

    fn position(&self, field: &str) -> Option<usize> {
        self.entries.iter().position(|(name, _)| name == field)
    }
}

impl Display for Row {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (index, (field, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}: {value}")?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        row.extend(iter);
        row
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for Row {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (field, value) in iter {
            self.insert(field, value);
        }
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (field, value) in &self.entries {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = Row;

            fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "a map of field names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Row, A::Error> {
                let mut row = Row::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((field, value)) = access.next_entry::<String, Value>()? {
                    row.insert(field, value);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// Rows returned by one `read` call, in the order the data source produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet {
    rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl From<Vec<Row>> for ResultSet {
    fn from(rows: Vec<Row>) -> Self {
        Self::new(rows)
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Builds a [`Row`] from `field => value` pairs.
///
/// ```
/// use datamap_core::{row, Value};
///
/// let row = row! { "id" => 1, "title" => "hello", "author_id" => Value::Null };
/// assert_eq!(row.len(), 3);
/// ```
#[macro_export]
macro_rules! row {
    () => {
        $crate::Row::new()
    };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut row = $crate::Row::new();
        $(
            row.insert($field, $crate::Value::from($value));
        )+
        row
    }};
}

#[cfg(test)]
mod tests {
    use super::Row;
    use crate::model::value::Value;

    #[test]
    fn insert_replaces_in_place_and_keeps_order() {
        let mut row = row! { "a" => 1, "b" => 2 };
        let previous = row.insert("a", 10);

        assert_eq!(previous, Some(Value::Integer(1)));
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(row.get("a"), Some(&Value::Integer(10)));
    }

    #[test]
    fn lookup_descends_into_sub_rows() {
        let mut row = row! { "id" => 1 };
        row.sub_row_mut("author").insert("name", "ada");

        assert_eq!(row.lookup("author.name"), Some(&Value::from("ada")));
        assert_eq!(row.lookup("author.email"), None);
        assert_eq!(row.lookup("id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn exact_dotted_key_wins_over_nested_path() {
        let mut row = Row::new();
        row.insert("author.name", "flat");
        row.sub_row_mut("author").insert("name", "nested");

        assert_eq!(row.lookup("author.name"), Some(&Value::from("flat")));
    }
}
