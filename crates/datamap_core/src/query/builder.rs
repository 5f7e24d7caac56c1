//! Query compiler: renders `QueryPlan`s into parameterized SQL.
//!
//! # Responsibility
//! - Produce SQL text plus the ordered parameter list for select, count,
//!   insert, update and delete statements.
//! - Qualify bare column references with the primary table.
//!
//! # Invariants
//! - Placeholders are named `:v0, :v1, ...` in the exact order they are
//!   appended: write values first, then `WHERE`, `HAVING`, `LIMIT`, `OFFSET`.
//! - Clause order is fixed: select, from, joins, where, group, having, order,
//!   limit/offset. Empty clauses are omitted.
//! - Negated predicates also match `NULL`, mirroring in-memory evaluation.
//! - Identifiers are quoted through the dialect; anything that is not a plain
//!   `column`, `table.column` or `table.*` reference is emitted verbatim.

use crate::db::dialect::Dialect;
use crate::model::row::Row;
use crate::model::value::Value;
use crate::query::criteria::{Operator, Predicate};
use crate::query::plan::QueryPlan;
use crate::query::{QueryError, QueryResult};
use once_cell::sync::Lazy;
use regex::Regex;

static PLAIN_REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\*|[A-Za-z_][A-Za-z0-9_]*(?:\.(?:\*|[A-Za-z_][A-Za-z0-9_]*))?)$")
        .expect("valid reference regex")
});

/// Column used to address rows when UPDATE/DELETE must be windowed.
pub const DEFAULT_WINDOW_KEY: &str = "rowid";

/// SQL text with its ordered, named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<(String, Value)>,
}

impl CompiledQuery {
    pub fn param_values(&self) -> impl Iterator<Item = &Value> {
        self.params.iter().map(|(_, value)| value)
    }
}

#[derive(Default)]
struct Bindings {
    params: Vec<(String, Value)>,
}

impl Bindings {
    fn bind(&mut self, value: Value) -> String {
        let name = format!(":v{}", self.params.len());
        self.params.push((name.clone(), value));
        name
    }
}

/// Stateless SQL compiler bound to one dialect.
pub struct QueryBuilder<'d> {
    dialect: &'d dyn Dialect,
    window_key: String,
}

impl<'d> QueryBuilder<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            window_key: DEFAULT_WINDOW_KEY.to_string(),
        }
    }

    /// Overrides the row-addressing column used by windowed UPDATE/DELETE.
    pub fn with_window_key(mut self, key: impl Into<String>) -> Self {
        self.window_key = key.into();
        self
    }

    /// Compiles a SELECT for `plan`.
    pub fn select(&self, plan: &QueryPlan) -> CompiledQuery {
        let mut bindings = Bindings::default();
        let mut sql = format!("SELECT {}", self.select_list(plan));
        self.append_source(&mut sql, plan, &mut bindings);
        self.append_grouping(&mut sql, plan, &mut bindings);
        self.append_order(&mut sql, plan);
        self.append_window(&mut sql, plan, &mut bindings);
        finish(sql, bindings)
    }

    /// Compiles a scalar `COUNT(*)` with the plan's criteria, joins and grouping.
    ///
    /// Order and window options do not apply to counts.
    pub fn count(&self, plan: &QueryPlan) -> CompiledQuery {
        let mut bindings = Bindings::default();
        let count_alias = self.dialect.quote_identifier("count");
        let sql = if plan.group.is_empty() {
            let mut sql = format!("SELECT COUNT(*) AS {count_alias}");
            self.append_source(&mut sql, plan, &mut bindings);
            sql
        } else {
            let mut inner = String::from("SELECT 1");
            self.append_source(&mut inner, plan, &mut bindings);
            self.append_grouping(&mut inner, plan, &mut bindings);
            format!(
                "SELECT COUNT(*) AS {count_alias} FROM ({inner}) AS {}",
                self.dialect.quote_identifier("grouped")
            )
        };
        finish(sql, bindings)
    }

    /// Compiles an INSERT of one row.
    pub fn insert(&self, table: &str, data: &Row) -> QueryResult<CompiledQuery> {
        ensure_storable(data)?;
        let mut bindings = Bindings::default();
        let table_sql = self.dialect.quote_identifier(table);

        if data.is_empty() {
            return Ok(finish(
                format!("INSERT INTO {table_sql} DEFAULT VALUES"),
                bindings,
            ));
        }

        let columns = data
            .keys()
            .map(|column| self.dialect.quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = data
            .values()
            .map(|value| bindings.bind(value.clone()))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(finish(
            format!("INSERT INTO {table_sql} ({columns}) VALUES ({placeholders})"),
            bindings,
        ))
    }

    /// Compiles an UPDATE touching exactly the rows `select(plan)` returns.
    pub fn update(&self, plan: &QueryPlan, data: &Row) -> QueryResult<CompiledQuery> {
        if data.is_empty() {
            return Err(QueryError::EmptyData);
        }
        ensure_storable(data)?;

        let mut bindings = Bindings::default();
        let assignments = data
            .iter()
            .map(|(column, value)| {
                format!(
                    "{} = {}",
                    self.dialect.quote_identifier(column),
                    bindings.bind(value.clone())
                )
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "UPDATE {} SET {assignments}",
            self.dialect.quote_identifier(&plan.table)
        );
        self.append_mutation_scope(&mut sql, plan, &mut bindings);
        Ok(finish(sql, bindings))
    }

    /// Compiles a DELETE removing exactly the rows `select(plan)` returns.
    pub fn delete(&self, plan: &QueryPlan) -> CompiledQuery {
        let mut bindings = Bindings::default();
        let mut sql = format!(
            "DELETE FROM {}",
            self.dialect.quote_identifier(&plan.table)
        );
        self.append_mutation_scope(&mut sql, plan, &mut bindings);
        finish(sql, bindings)
    }

    /// Renders a column reference, qualifying bare names with `table`.
    pub fn reference(&self, table: &str, field: &str) -> String {
        if !PLAIN_REFERENCE_RE.is_match(field) {
            return field.to_string();
        }
        if field == "*" {
            return field.to_string();
        }

        let (qualifier, column) = field.split_once('.').unwrap_or((table, field));
        let column = if column == "*" {
            column.to_string()
        } else {
            self.dialect.quote_identifier(column)
        };
        format!("{}.{column}", self.dialect.quote_identifier(qualifier))
    }

    fn select_list(&self, plan: &QueryPlan) -> String {
        if plan.fields.is_empty() {
            return "*".to_string();
        }

        plan.fields
            .iter()
            .map(|field| self.select_item(&plan.table, field))
            .collect::<Vec<_>>()
            .join(", ")
    }

    // Plain columns are aliased `table.column` so result mapping can recover
    // which table each column came from.
    fn select_item(&self, table: &str, field: &str) -> String {
        if !PLAIN_REFERENCE_RE.is_match(field) || field.ends_with('*') {
            return self.reference(table, field);
        }
        let label = match field.split_once('.') {
            Some(_) => field.to_string(),
            None => format!("{table}.{field}"),
        };
        format!(
            "{} AS {}",
            self.reference(table, field),
            self.dialect.quote_identifier(&label)
        )
    }

    fn append_source(&self, sql: &mut String, plan: &QueryPlan, bindings: &mut Bindings) {
        sql.push_str(" FROM ");
        sql.push_str(&self.dialect.quote_identifier(&plan.table));
        self.append_joins(sql, plan);
        self.append_where(sql, plan, bindings);
    }

    fn append_joins(&self, sql: &mut String, plan: &QueryPlan) {
        for join in &plan.joins {
            sql.push(' ');
            sql.push_str(join.kind.as_sql());
            sql.push(' ');
            sql.push_str(&self.dialect.quote_identifier(&join.table));
            if let Some(alias) = &join.alias {
                sql.push_str(" AS ");
                sql.push_str(&self.dialect.quote_identifier(alias));
            }
            if !join.on.is_empty() {
                let conditions = join
                    .on
                    .iter()
                    .map(|(left, right)| {
                        format!(
                            "{} = {}",
                            self.reference(&plan.table, left),
                            self.reference(join.name(), right)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                sql.push_str(" ON ");
                sql.push_str(&conditions);
            }
        }
    }

    fn append_where(&self, sql: &mut String, plan: &QueryPlan, bindings: &mut Bindings) {
        if plan.conditions.is_empty() {
            return;
        }
        sql.push_str(" WHERE ");
        sql.push_str(&self.conditions(&plan.table, &plan.conditions, bindings));
    }

    fn append_grouping(&self, sql: &mut String, plan: &QueryPlan, bindings: &mut Bindings) {
        if !plan.group.is_empty() {
            let group = plan
                .group
                .iter()
                .map(|field| self.reference(&plan.table, field))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" GROUP BY ");
            sql.push_str(&group);
        }
        if !plan.having.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&self.conditions(&plan.table, &plan.having, bindings));
        }
    }

    fn append_order(&self, sql: &mut String, plan: &QueryPlan) {
        if plan.order.is_empty() {
            return;
        }
        let order = plan
            .order
            .iter()
            .map(|key| {
                format!(
                    "{} {}",
                    self.reference(&plan.table, &key.field),
                    key.direction.as_sql()
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(" ORDER BY ");
        sql.push_str(&order);
    }

    fn append_window(&self, sql: &mut String, plan: &QueryPlan, bindings: &mut Bindings) {
        match (plan.limit, plan.offset) {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ");
                sql.push_str(&bindings.bind(to_integer(limit)));
                if let Some(offset) = offset {
                    sql.push_str(" OFFSET ");
                    sql.push_str(&bindings.bind(to_integer(offset)));
                }
            }
            (None, Some(offset)) => {
                sql.push_str(" LIMIT -1 OFFSET ");
                sql.push_str(&bindings.bind(to_integer(offset)));
            }
            (None, None) => {}
        }
    }

    // UPDATE/DELETE select their target keys through a subquery when the
    // query joins other tables or carries a limit/offset.
    fn append_mutation_scope(&self, sql: &mut String, plan: &QueryPlan, bindings: &mut Bindings) {
        if plan.joins.is_empty() && !plan.is_windowed() {
            self.append_where(sql, plan, bindings);
            return;
        }

        let key = self.reference(&plan.table, &self.window_key);
        let mut inner = format!("SELECT {key}");
        self.append_source(&mut inner, plan, bindings);
        self.append_order(&mut inner, plan);
        self.append_window(&mut inner, plan, bindings);

        sql.push_str(&format!(" WHERE {key} IN ({inner})"));
    }

    fn conditions(&self, table: &str, predicates: &[Predicate], bindings: &mut Bindings) -> String {
        predicates
            .iter()
            .map(|predicate| self.predicate(table, predicate, bindings))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn predicate(&self, table: &str, predicate: &Predicate, bindings: &mut Bindings) -> String {
        let field = self.reference(table, predicate.field());
        let operator = predicate.operator();
        let value = predicate.value();
        let items = value.as_list().unwrap_or_default();

        let positive = match operator {
            Operator::Eq | Operator::Neq => {
                format!("{field} = {}", bindings.bind(value.clone()))
            }
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                format!("{field} {operator} {}", bindings.bind(value.clone()))
            }
            Operator::In | Operator::NotIn => {
                if items.is_empty() {
                    return if operator == Operator::In {
                        "0 = 1".to_string()
                    } else {
                        "1 = 1".to_string()
                    };
                }
                let placeholders = items
                    .iter()
                    .map(|item| bindings.bind(item.clone()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{field} IN ({placeholders})")
            }
            Operator::Between | Operator::NotBetween => {
                let low = bindings.bind(items.first().cloned().unwrap_or_default());
                let high = bindings.bind(items.get(1).cloned().unwrap_or_default());
                format!("{field} BETWEEN {low} AND {high}")
            }
            Operator::Like | Operator::NotLike => {
                format!("{field} LIKE {}", bindings.bind(value.clone()))
            }
            Operator::IsNull => return format!("{field} IS NULL"),
            Operator::IsNotNull => return format!("{field} IS NOT NULL"),
        };

        if operator.is_negated() {
            format!("(NOT ({positive}) OR {field} IS NULL)")
        } else {
            positive
        }
    }
}

fn finish(sql: String, bindings: Bindings) -> CompiledQuery {
    CompiledQuery {
        sql,
        params: bindings.params,
    }
}

fn to_integer(value: u64) -> Value {
    Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

fn ensure_storable(data: &Row) -> QueryResult<()> {
    match data.iter().find(|(_, value)| value.is_composite()) {
        Some((field, value)) => Err(QueryError::UnsupportedValue {
            field: field.to_string(),
            type_name: value.type_name(),
        }),
        None => Ok(()),
    }
}
