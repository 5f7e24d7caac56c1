//! Backend-agnostic query descriptor.
//!
//! # Responsibility
//! - Carry raw criteria and an options bag from caller to data source.
//!
//! # Invariants
//! - No validation happens here; consumers validate via `QueryPlan`.
//! - Unrecognized option keys are preserved verbatim.

use crate::model::row::Row;
use crate::model::value::Value;
use serde::{Deserialize, Serialize};

pub const OPTION_FIELDS: &str = "fields";
pub const OPTION_JOINS: &str = "joins";
pub const OPTION_GROUP: &str = "group";
pub const OPTION_HAVING: &str = "having";
pub const OPTION_ORDER: &str = "order";
pub const OPTION_LIMIT: &str = "limit";
pub const OPTION_OFFSET: &str = "offset";
pub const OPTION_WITH: &str = "with";

/// Option keys interpreted by data sources and the relation resolver.
pub const RECOGNIZED_OPTIONS: &[&str] = &[
    OPTION_FIELDS,
    OPTION_JOINS,
    OPTION_GROUP,
    OPTION_HAVING,
    OPTION_ORDER,
    OPTION_LIMIT,
    OPTION_OFFSET,
    OPTION_WITH,
];

/// Sort direction for `order` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Criteria plus options for one logical query.
///
/// Built fresh per call and handed to exactly one data source operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryObject {
    #[serde(default)]
    criteria: Row,
    #[serde(default)]
    options: Row,
}

impl QueryObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_criteria(criteria: Row) -> Self {
        Self {
            criteria,
            options: Row::new(),
        }
    }

    pub fn from_parts(criteria: Row, options: Row) -> Self {
        Self { criteria, options }
    }

    pub fn criteria(&self) -> &Row {
        &self.criteria
    }

    pub fn set_criteria(&mut self, criteria: Row) -> &mut Self {
        self.criteria = criteria;
        self
    }

    /// Adds or replaces one `"field[ operator]"` entry.
    pub fn add_criterion(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.criteria.insert(key, value);
        self
    }

    pub fn options(&self) -> &Row {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Stores any option, recognized or not.
    pub fn set_option(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.options.insert(key, value);
        self
    }

    pub fn fields(&self) -> Option<&Value> {
        self.option(OPTION_FIELDS)
    }

    pub fn set_fields<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_option(OPTION_FIELDS, string_list(fields))
    }

    pub fn joins(&self) -> Option<&Value> {
        self.option(OPTION_JOINS)
    }

    /// Appends one join descriptor (see [`JoinSpec`]).
    pub fn add_join(&mut self, join: impl Into<Value>) -> &mut Self {
        let join = join.into();
        match self.options.get_mut(OPTION_JOINS) {
            Some(Value::List(joins)) => joins.push(join),
            _ => {
                self.options.insert(OPTION_JOINS, Value::List(vec![join]));
            }
        }
        self
    }

    pub fn group(&self) -> Option<&Value> {
        self.option(OPTION_GROUP)
    }

    pub fn set_group<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_option(OPTION_GROUP, string_list(fields))
    }

    pub fn having(&self) -> Option<&Value> {
        self.option(OPTION_HAVING)
    }

    pub fn set_having(&mut self, conditions: Row) -> &mut Self {
        self.set_option(OPTION_HAVING, conditions)
    }

    pub fn order(&self) -> Option<&Value> {
        self.option(OPTION_ORDER)
    }

    /// Appends one `field DIRECTION` order entry.
    pub fn add_order(&mut self, field: &str, direction: SortDirection) -> &mut Self {
        let entry = Value::from(format!("{field} {}", direction.as_sql()));
        match self.options.get_mut(OPTION_ORDER) {
            Some(Value::List(order)) => order.push(entry),
            _ => {
                self.options.insert(OPTION_ORDER, Value::List(vec![entry]));
            }
        }
        self
    }

    pub fn limit(&self) -> Option<&Value> {
        self.option(OPTION_LIMIT)
    }

    pub fn set_limit(&mut self, limit: u64) -> &mut Self {
        self.set_option(OPTION_LIMIT, Value::Integer(saturating_i64(limit)))
    }

    pub fn offset(&self) -> Option<&Value> {
        self.option(OPTION_OFFSET)
    }

    pub fn set_offset(&mut self, offset: u64) -> &mut Self {
        self.set_option(OPTION_OFFSET, Value::Integer(saturating_i64(offset)))
    }

    pub fn with(&self) -> Option<&Value> {
        self.option(OPTION_WITH)
    }

    /// Requests eager loading of the named relations.
    pub fn set_with<I, S>(&mut self, relations: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_option(OPTION_WITH, string_list(relations))
    }
}

/// Typed builder for one `joins` entry.
///
/// Converts into the raw option shape
/// `{type, table, alias?, on: {left_column: right_column}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    kind: String,
    table: String,
    alias: Option<String>,
    on: Vec<(String, String)>,
}

impl JoinSpec {
    pub fn new(kind: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            table: table.into(),
            alias: None,
            on: Vec::new(),
        }
    }

    pub fn inner(table: impl Into<String>) -> Self {
        Self::new("inner", table)
    }

    pub fn left(table: impl Into<String>) -> Self {
        Self::new("left", table)
    }

    pub fn right(table: impl Into<String>) -> Self {
        Self::new("right", table)
    }

    pub fn full(table: impl Into<String>) -> Self {
        Self::new("full", table)
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds an equality condition between two column references.
    pub fn on(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.on.push((left.into(), right.into()));
        self
    }
}

impl From<JoinSpec> for Value {
    fn from(join: JoinSpec) -> Self {
        let mut row = Row::new();
        row.insert("type", join.kind);
        row.insert("table", join.table);
        if let Some(alias) = join.alias {
            row.insert("alias", alias);
        }
        if !join.on.is_empty() {
            row.insert("on", join.on.into_iter().collect::<Row>());
        }
        Value::Map(row)
    }
}

fn string_list<I, S>(items: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Value::List(
        items
            .into_iter()
            .map(|item| Value::Text(item.into()))
            .collect(),
    )
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{JoinSpec, QueryObject, SortDirection};
    use crate::model::value::Value;
    use crate::row;

    #[test]
    fn unknown_options_are_preserved() {
        let mut query = QueryObject::new();
        query.set_option("cache_ttl", 30).set_limit(5);

        assert_eq!(query.option("cache_ttl"), Some(&Value::Integer(30)));
        assert_eq!(query.limit(), Some(&Value::Integer(5)));
    }

    #[test]
    fn add_order_and_add_join_accumulate() {
        let mut query = QueryObject::with_criteria(row! { "id >" => 1 });
        query
            .add_order("title", SortDirection::Asc)
            .add_order("id", SortDirection::Desc)
            .add_join(JoinSpec::left("users").alias("author").on("posts.author_id", "author.id"));

        assert_eq!(
            query.order(),
            Some(&Value::list(["title ASC", "id DESC"]))
        );
        let joins = query.joins().and_then(Value::as_list).unwrap();
        assert_eq!(joins.len(), 1);
        let join = joins[0].as_row().unwrap();
        assert_eq!(join.get("type"), Some(&Value::from("left")));
        assert_eq!(
            join.get("on").and_then(Value::as_row).and_then(|on| on.get("posts.author_id")),
            Some(&Value::from("author.id"))
        );
    }
}
