//! Validated, typed view of a `QueryObject` for one table.
//!
//! # Responsibility
//! - Turn the raw criteria/options bag into typed clauses consumed by both
//!   the SQL compiler and the in-memory engine.
//! - Surface malformed criteria and invalid join configuration before any
//!   backend work starts.
//!
//! # Invariants
//! - Every join has a supported kind and a non-empty table.
//! - `limit`/`offset`, when present, are non-negative integers.

use crate::model::row::Row;
use crate::model::value::Value;
use crate::query::criteria::{self, Predicate};
use crate::query::query_object::{
    QueryObject, SortDirection, OPTION_FIELDS, OPTION_GROUP, OPTION_HAVING, OPTION_LIMIT,
    OPTION_OFFSET, OPTION_ORDER, OPTION_WITH,
};
use crate::query::{QueryError, QueryResult};

/// Supported JOIN flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    /// Parses `left|right|full|inner`, case-insensitively.
    pub fn parse(token: &str) -> QueryResult<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "inner" => Ok(Self::Inner),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "full" => Ok(Self::Full),
            _ => Err(QueryError::UnsupportedJoinType(token.to_string())),
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
        }
    }
}

/// One validated join clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: Option<String>,
    /// Column equality pairs combined with AND.
    pub on: Vec<(String, String)>,
}

impl Join {
    /// Name the joined columns are grouped under: the alias, else the table.
    pub fn name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    fn parse(value: &Value) -> QueryResult<Self> {
        let descriptor = value.as_row().ok_or_else(|| {
            QueryError::InvalidJoin(format!("join descriptor must be a map, got {}", value.type_name()))
        })?;

        let kind = match descriptor.get("type") {
            Some(Value::Text(token)) => JoinKind::parse(token)?,
            Some(other) => return Err(QueryError::UnsupportedJoinType(other.to_string())),
            None => {
                return Err(QueryError::InvalidJoin(
                    "join descriptor requires `type`".to_string(),
                ))
            }
        };

        let table = match descriptor.get("table") {
            Some(Value::Text(table)) if !table.trim().is_empty() => table.trim().to_string(),
            _ => {
                return Err(QueryError::InvalidJoin(
                    "join descriptor requires `table`".to_string(),
                ))
            }
        };

        let alias = match descriptor.get("alias") {
            None | Some(Value::Null) => None,
            Some(Value::Text(alias)) if !alias.trim().is_empty() => Some(alias.trim().to_string()),
            Some(other) => {
                return Err(QueryError::InvalidJoin(format!(
                    "join alias for `{table}` must be text, got `{other}`"
                )))
            }
        };

        let on = match descriptor.get("on") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Map(conditions)) => conditions
                .iter()
                .map(|(left, right)| match right {
                    Value::Text(right) => Ok((left.to_string(), right.clone())),
                    other => Err(QueryError::InvalidJoin(format!(
                        "join condition `{left}` must reference a column, got `{other}`"
                    ))),
                })
                .collect::<QueryResult<Vec<_>>>()?,
            Some(other) => {
                return Err(QueryError::InvalidJoin(format!(
                    "join conditions for `{table}` must be a map, got {}",
                    other.type_name()
                )))
            }
        };

        Ok(Self {
            kind,
            table,
            alias,
            on,
        })
    }
}

/// One `ORDER BY` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderKey {
    /// Parses `field`, `field ASC` or `field DESC`.
    pub fn parse(entry: &str) -> QueryResult<Self> {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            return Err(invalid_option(OPTION_ORDER, "order entries cannot be empty"));
        }

        if let Some((field, direction)) = trimmed.rsplit_once(char::is_whitespace) {
            let direction = match direction.to_ascii_uppercase().as_str() {
                "ASC" => Some(SortDirection::Asc),
                "DESC" => Some(SortDirection::Desc),
                _ => None,
            };
            if let Some(direction) = direction {
                return Ok(Self {
                    field: field.trim().to_string(),
                    direction,
                });
            }
        }

        Ok(Self {
            field: trimmed.to_string(),
            direction: SortDirection::Asc,
        })
    }
}

/// Typed clauses for one read/update/delete/count against `table`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub table: String,
    pub fields: Vec<String>,
    pub joins: Vec<Join>,
    pub conditions: Vec<Predicate>,
    pub group: Vec<String>,
    pub having: Vec<Predicate>,
    pub order: Vec<OrderKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub with: Vec<String>,
}

impl QueryPlan {
    /// Empty plan selecting every row of `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            group: Vec::new(),
            having: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            with: Vec::new(),
        }
    }

    /// Validates `query` against `table`.
    ///
    /// # Errors
    /// - `QueryError::Criteria` for malformed criteria or `having` entries.
    /// - `QueryError::InvalidJoin`/`UnsupportedJoinType` for bad joins.
    /// - `QueryError::InvalidOption` for wrongly shaped options and for
    ///   `having` without `group`.
    pub fn from_query(table: &str, query: &QueryObject) -> QueryResult<Self> {
        let table = table.trim();
        if table.is_empty() {
            return Err(QueryError::EmptyTable);
        }

        let joins = match query.joins() {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::List(items)) => items.iter().map(Join::parse).collect::<QueryResult<_>>()?,
            Some(single @ Value::Map(_)) => vec![Join::parse(single)?],
            Some(other) => {
                return Err(QueryError::InvalidJoin(format!(
                    "joins must be a list of descriptors, got {}",
                    other.type_name()
                )))
            }
        };

        let having = match query.having() {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Map(conditions)) => criteria::parse(conditions)?,
            Some(other) => {
                return Err(invalid_option(
                    OPTION_HAVING,
                    &format!("expected a criteria map, got {}", other.type_name()),
                ))
            }
        };

        let order = match query.order() {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Map(entries)) => parse_order_map(entries)?,
            Some(value) => text_list(OPTION_ORDER, value)?
                .iter()
                .map(|entry| OrderKey::parse(entry))
                .collect::<QueryResult<_>>()?,
        };

        let group = optional_text_list(OPTION_GROUP, query.group())?;
        if !having.is_empty() && group.is_empty() {
            return Err(invalid_option(
                OPTION_HAVING,
                "requires a `group` option; filter ungrouped rows through criteria",
            ));
        }

        Ok(Self {
            table: table.to_string(),
            fields: optional_text_list(OPTION_FIELDS, query.fields())?,
            joins,
            conditions: criteria::parse(query.criteria())?,
            group,
            having,
            order,
            limit: non_negative(OPTION_LIMIT, query.limit())?,
            offset: non_negative(OPTION_OFFSET, query.offset())?,
            with: optional_text_list(OPTION_WITH, query.with())?,
        })
    }

    /// Returns whether the plan restricts rows by position.
    pub fn is_windowed(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }
}

fn parse_order_map(entries: &Row) -> QueryResult<Vec<OrderKey>> {
    entries
        .iter()
        .map(|(field, direction)| {
            let direction = match direction {
                Value::Text(token) => match token.trim().to_ascii_uppercase().as_str() {
                    "ASC" => SortDirection::Asc,
                    "DESC" => SortDirection::Desc,
                    other => {
                        return Err(invalid_option(
                            OPTION_ORDER,
                            &format!("unknown direction `{other}` for `{field}`"),
                        ))
                    }
                },
                Value::Null => SortDirection::Asc,
                other => {
                    return Err(invalid_option(
                        OPTION_ORDER,
                        &format!("direction for `{field}` must be text, got {}", other.type_name()),
                    ))
                }
            };
            Ok(OrderKey {
                field: field.to_string(),
                direction,
            })
        })
        .collect()
}

fn optional_text_list(key: &'static str, value: Option<&Value>) -> QueryResult<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => text_list(key, value),
    }
}

fn text_list(key: &'static str, value: &Value) -> QueryResult<Vec<String>> {
    let items = match value {
        Value::Text(item) => return Ok(non_empty(item).into_iter().collect()),
        Value::List(items) => items,
        other => {
            return Err(invalid_option(
                key,
                &format!("expected text or a list of text, got {}", other.type_name()),
            ))
        }
    };

    let mut result = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Text(text) => result.extend(non_empty(text)),
            other => {
                return Err(invalid_option(
                    key,
                    &format!("list entries must be text, got {}", other.type_name()),
                ))
            }
        }
    }
    Ok(result)
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn non_negative(key: &'static str, value: Option<&Value>) -> QueryResult<Option<u64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_i64() {
            Some(number) if number >= 0 && !matches!(value, Value::Bool(_)) => {
                Ok(Some(number as u64))
            }
            _ => Err(invalid_option(
                key,
                &format!("expected a non-negative integer, got `{value}`"),
            )),
        },
    }
}

fn invalid_option(key: &'static str, message: &str) -> QueryError {
    QueryError::InvalidOption {
        key,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{JoinKind, OrderKey, QueryPlan};
    use crate::model::value::Value;
    use crate::query::criteria::Operator;
    use crate::query::query_object::{JoinSpec, QueryObject, SortDirection};
    use crate::query::QueryError;
    use crate::row;

    #[test]
    fn from_query_collects_every_clause() {
        let mut query = QueryObject::with_criteria(row! { "id >" => 10, "title LIKE" => "a%" });
        query
            .set_fields(["id", "title"])
            .add_join(JoinSpec::left("users").alias("author").on("posts.author_id", "author.id"))
            .set_group(["author.id"])
            .set_having(row! { "COUNT(*) >" => 1 })
            .add_order("title", SortDirection::Desc)
            .set_limit(5)
            .set_offset(2)
            .set_with(["comments"]);

        let plan = QueryPlan::from_query("posts", &query).unwrap();
        assert_eq!(plan.fields, vec!["id", "title"]);
        assert_eq!(plan.joins[0].kind, JoinKind::Left);
        assert_eq!(plan.joins[0].name(), "author");
        assert_eq!(plan.conditions.len(), 2);
        assert_eq!(plan.having[0].field(), "COUNT(*)");
        assert_eq!(plan.having[0].operator(), Operator::Gt);
        assert_eq!(plan.order[0].direction, SortDirection::Desc);
        assert_eq!(plan.limit, Some(5));
        assert_eq!(plan.offset, Some(2));
        assert_eq!(plan.with, vec!["comments"]);
    }

    #[test]
    fn join_without_table_is_rejected() {
        let mut query = QueryObject::new();
        query.add_join(Value::Map(row! { "type" => "left" }));

        let err = QueryPlan::from_query("posts", &query).unwrap_err();
        assert!(matches!(err, QueryError::InvalidJoin(message) if message.contains("table")));
    }

    #[test]
    fn unsupported_join_type_is_rejected() {
        let mut query = QueryObject::new();
        query.add_join(JoinSpec::new("outer", "users"));

        let err = QueryPlan::from_query("posts", &query).unwrap_err();
        assert_eq!(err, QueryError::UnsupportedJoinType("outer".to_string()));
    }

    #[test]
    fn join_kind_is_case_insensitive() {
        assert_eq!(JoinKind::parse("LEFT").unwrap(), JoinKind::Left);
        assert_eq!(JoinKind::parse("Inner").unwrap(), JoinKind::Inner);
    }

    #[test]
    fn order_accepts_map_and_text_forms() {
        let mut query = QueryObject::new();
        query.set_option("order", row! { "title" => "desc", "id" => "asc" });
        let plan = QueryPlan::from_query("posts", &query).unwrap();
        assert_eq!(plan.order[0].field, "title");
        assert_eq!(plan.order[0].direction, SortDirection::Desc);

        assert_eq!(
            OrderKey::parse("LOWER(title) desc").unwrap(),
            OrderKey {
                field: "LOWER(title)".to_string(),
                direction: SortDirection::Desc
            }
        );
        assert_eq!(OrderKey::parse("title").unwrap().direction, SortDirection::Asc);
    }

    #[test]
    fn negative_limit_is_rejected() {
        let mut query = QueryObject::new();
        query.set_option("limit", -1);

        let err = QueryPlan::from_query("posts", &query).unwrap_err();
        assert!(matches!(err, QueryError::InvalidOption { key: "limit", .. }));
    }

    #[test]
    fn having_without_group_is_rejected() {
        let mut query = QueryObject::new();
        query.set_having(row! { "score >" => 2 });

        let err = QueryPlan::from_query("posts", &query).unwrap_err();
        assert!(matches!(err, QueryError::InvalidOption { key: "having", .. }));
    }
}
