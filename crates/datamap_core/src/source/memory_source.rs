//! In-memory data source over ordered row collections.
//!
//! # Responsibility
//! - Interpret `QueryObject`s with the criteria engine instead of SQL.
//! - Generate auto-increment keys and snapshot state for transactions.
//!
//! # Invariants
//! - Pipeline order is join, filter, group, having, sort, window, project;
//!   this matches the clause order of the compiled SQL.
//! - `update`/`delete` touch exactly the rows `read` would return for the
//!   same query, window included.
//! - Generated keys are strictly above the last key used for the table and
//!   never collide with an occupied key.
//!
//! Not safe for concurrent mutation: there is no internal locking, callers
//! that share an instance across threads must serialize access themselves.

use crate::model::row::{ResultSet, Row};
use crate::model::value::Value;
use crate::query::criteria::{self, CriteriaError, Predicate};
use crate::query::plan::{JoinKind, QueryPlan};
use crate::query::query_object::{QueryObject, SortDirection};
use crate::query::QueryError;
use crate::source::{DataSource, DataSourceError, DataSourceResult};
use log::debug;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

const DEFAULT_PRIMARY_KEY: &str = "id";

#[derive(Debug, Clone, Default)]
struct Collections {
    tables: BTreeMap<String, Vec<Row>>,
    last_keys: HashMap<String, i64>,
}

/// One candidate row plus the position of its primary row in storage.
struct ScanRow {
    index: usize,
    row: Row,
}

/// Data source that keeps every table as a `Vec<Row>` in scan order.
#[derive(Debug, Default)]
pub struct MemoryDataSource {
    state: Collections,
    primary_keys: HashMap<String, String>,
    snapshot: Option<Collections>,
    last_insert_id: Option<Value>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `field` instead of `id` as the generated key of `table`.
    pub fn with_primary_key(mut self, table: impl Into<String>, field: impl Into<String>) -> Self {
        self.primary_keys.insert(table.into(), field.into());
        self
    }

    /// Stored rows of `table` in scan order.
    pub fn rows(&self, table: &str) -> &[Row] {
        self.state
            .tables
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    fn primary_key(&self, table: &str) -> &str {
        self.primary_keys
            .get(table)
            .map(String::as_str)
            .unwrap_or(DEFAULT_PRIMARY_KEY)
    }

    fn plan(&self, table: &str, query: &QueryObject) -> DataSourceResult<QueryPlan> {
        Ok(QueryPlan::from_query(table, query)?)
    }

    fn next_key(&mut self, table: &str) -> DataSourceResult<i64> {
        let pk = self.primary_key(table).to_string();
        let rows = self.state.tables.get(table).map(Vec::as_slice).unwrap_or(&[]);
        let occupied = rows
            .iter()
            .filter_map(|row| row.get(&pk).and_then(Value::as_i64))
            .collect::<HashSet<_>>();

        let exhausted = || {
            DataSourceError::InvalidData(format!("key space of `{table}` is exhausted"))
        };
        let last = self.state.last_keys.get(table).copied().unwrap_or(0);
        let mut candidate = last.checked_add(1).ok_or_else(exhausted)?;
        while occupied.contains(&candidate) {
            candidate = candidate.checked_add(1).ok_or_else(exhausted)?;
        }
        self.state.last_keys.insert(table.to_string(), candidate);
        Ok(candidate)
    }

    /// Runs the shared read pipeline; `windowed` is false for counts.
    fn scan(&self, plan: &QueryPlan, windowed: bool) -> DataSourceResult<Vec<ScanRow>> {
        let mut candidates = self
            .rows(&plan.table)
            .iter()
            .enumerate()
            .map(|(index, row)| ScanRow {
                index,
                row: row.clone(),
            })
            .collect::<Vec<_>>();

        for join in &plan.joins {
            let outer = match join.kind {
                JoinKind::Inner => false,
                JoinKind::Left => true,
                JoinKind::Right | JoinKind::Full => {
                    return Err(DataSourceError::Unsupported(format!(
                        "{} is not supported by the in-memory engine",
                        join.kind.as_sql()
                    )))
                }
            };
            let targets = self.rows(&join.table);
            let name = join.name();

            let mut joined = Vec::with_capacity(candidates.len());
            for candidate in candidates {
                let mut matched = false;
                for target in targets {
                    if join_matches(&plan.table, name, &join.on, &candidate.row, target)? {
                        matched = true;
                        let mut row = candidate.row.clone();
                        row.insert(name, target.clone());
                        joined.push(ScanRow {
                            index: candidate.index,
                            row,
                        });
                    }
                }
                if !matched && outer {
                    let mut row = candidate.row;
                    row.insert(name, null_row(plan, name, targets));
                    joined.push(ScanRow {
                        index: candidate.index,
                        row,
                    });
                }
            }
            candidates = joined;
        }

        let conditions = unqualify_all(&plan.table, &plan.conditions);
        let mut filtered = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if criteria::matches(&conditions, &candidate.row)? {
                filtered.push(candidate);
            }
        }

        if !plan.group.is_empty() {
            let group = plan
                .group
                .iter()
                .map(|field| unqualify(&plan.table, field).to_string())
                .collect::<Vec<_>>();
            let mut seen = HashSet::new();
            let mut representatives = Vec::new();
            for candidate in filtered {
                let key = group
                    .iter()
                    .map(|field| lookup(&candidate.row, field).map(Value::index_key))
                    .collect::<Result<Vec<_>, _>>()?;
                if seen.insert(key) {
                    representatives.push(candidate);
                }
            }
            filtered = representatives;
        }

        if !plan.having.is_empty() {
            let having = unqualify_all(&plan.table, &plan.having);
            let mut kept = Vec::with_capacity(filtered.len());
            for candidate in filtered {
                if criteria::matches(&having, &candidate.row)? {
                    kept.push(candidate);
                }
            }
            filtered = kept;
        }

        if !windowed {
            return Ok(filtered);
        }

        if !plan.order.is_empty() {
            filtered = sort_rows(plan, filtered)?;
        }

        let offset = plan.offset.unwrap_or(0) as usize;
        let limit = plan.limit.map_or(usize::MAX, |limit| limit as usize);
        Ok(filtered.into_iter().skip(offset).take(limit).collect())
    }

    /// Storage positions of the rows `read` would return, deduplicated.
    fn target_indices(&self, plan: &QueryPlan) -> DataSourceResult<Vec<usize>> {
        let mut seen = HashSet::new();
        Ok(self
            .scan(plan, true)?
            .into_iter()
            .map(|candidate| candidate.index)
            .filter(|index| seen.insert(*index))
            .collect())
    }
}

impl DataSource for MemoryDataSource {
    fn create(&mut self, table: &str, data: &Row) -> DataSourceResult<Value> {
        let table = table.trim();
        if table.is_empty() {
            return Err(QueryError::EmptyTable.into());
        }
        ensure_storable(data)?;

        let pk = self.primary_key(table).to_string();
        let id = match data.get(&pk) {
            Some(value) if !value.is_null() => {
                let taken = self
                    .rows(table)
                    .iter()
                    .any(|row| row.get(&pk).is_some_and(|existing| existing.sql_eq(value)));
                if taken {
                    return Err(DataSourceError::DuplicateKey {
                        table: table.to_string(),
                        key: value.clone(),
                    });
                }
                if let Some(number) = value.as_i64() {
                    let last = self.state.last_keys.entry(table.to_string()).or_insert(0);
                    *last = (*last).max(number);
                }
                value.clone()
            }
            _ => Value::Integer(self.next_key(table)?),
        };

        let mut row = Row::with_capacity(data.len() + 1);
        row.insert(pk.as_str(), id.clone());
        for (field, value) in data.iter() {
            if field != pk {
                row.insert(field, value.clone());
            }
        }
        self.state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);

        debug!("event=memory_create module=source status=ok table={table} id={id}");
        self.last_insert_id = Some(id.clone());
        Ok(id)
    }

    fn last_insert_id(&self) -> Option<Value> {
        self.last_insert_id.clone()
    }

    fn read(&self, table: &str, query: &QueryObject) -> DataSourceResult<ResultSet> {
        let plan = self.plan(table, query)?;
        let rows = self.scan(&plan, true)?;

        let join_names = plan.joins.iter().map(|join| join.name()).collect::<Vec<_>>();
        let projected = rows
            .into_iter()
            .map(|candidate| project(&plan, &join_names, candidate.row))
            .collect::<DataSourceResult<Vec<_>>>()?;

        debug!(
            "event=memory_read module=source status=ok table={} rows={}",
            plan.table,
            projected.len()
        );
        Ok(ResultSet::new(projected))
    }

    fn update(&mut self, table: &str, query: &QueryObject, data: &Row) -> DataSourceResult<u64> {
        let plan = self.plan(table, query)?;
        if data.is_empty() {
            return Err(QueryError::EmptyData.into());
        }
        ensure_storable(data)?;

        let indices = self.target_indices(&plan)?;
        if let Some(rows) = self.state.tables.get_mut(&plan.table) {
            for index in &indices {
                if let Some(row) = rows.get_mut(*index) {
                    for (field, value) in data.iter() {
                        row.insert(field, value.clone());
                    }
                }
            }
        }

        debug!(
            "event=memory_update module=source status=ok table={} changed={}",
            plan.table,
            indices.len()
        );
        Ok(indices.len() as u64)
    }

    fn delete(&mut self, table: &str, query: &QueryObject) -> DataSourceResult<u64> {
        let plan = self.plan(table, query)?;
        let mut indices = self.target_indices(&plan)?;
        indices.sort_unstable_by(|left, right| right.cmp(left));

        if let Some(rows) = self.state.tables.get_mut(&plan.table) {
            for index in &indices {
                rows.remove(*index);
            }
        }

        debug!(
            "event=memory_delete module=source status=ok table={} changed={}",
            plan.table,
            indices.len()
        );
        Ok(indices.len() as u64)
    }

    fn count(&self, table: &str, query: &QueryObject) -> DataSourceResult<u64> {
        let plan = self.plan(table, query)?;
        Ok(self.scan(&plan, false)?.len() as u64)
    }

    fn begin(&mut self) -> DataSourceResult<()> {
        if self.snapshot.is_some() {
            return Err(DataSourceError::Transaction(
                "a transaction is already open".to_string(),
            ));
        }
        self.snapshot = Some(self.state.clone());
        debug!("event=memory_transaction module=source status=begin");
        Ok(())
    }

    fn commit(&mut self) -> DataSourceResult<()> {
        if self.snapshot.take().is_none() {
            return Err(DataSourceError::Transaction(
                "commit without an open transaction".to_string(),
            ));
        }
        debug!("event=memory_transaction module=source status=commit");
        Ok(())
    }

    fn rollback(&mut self) -> DataSourceResult<()> {
        let snapshot = self.snapshot.take().ok_or_else(|| {
            DataSourceError::Transaction("rollback without an open transaction".to_string())
        })?;
        self.state = snapshot;
        debug!("event=memory_transaction module=source status=rollback");
        Ok(())
    }
}

fn ensure_storable(data: &Row) -> DataSourceResult<()> {
    match data.iter().find(|(_, value)| value.is_composite()) {
        Some((field, value)) => Err(QueryError::UnsupportedValue {
            field: field.to_string(),
            type_name: value.type_name(),
        }
        .into()),
        None => Ok(()),
    }
}

fn unqualify<'a>(table: &str, field: &'a str) -> &'a str {
    field
        .strip_prefix(table)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(field)
}

fn unqualify_all(table: &str, predicates: &[Predicate]) -> Vec<Predicate> {
    predicates
        .iter()
        .map(|predicate| predicate.with_field(unqualify(table, predicate.field())))
        .collect()
}

fn lookup<'r>(row: &'r Row, field: &str) -> Result<&'r Value, CriteriaError> {
    row.lookup(field)
        .ok_or_else(|| CriteriaError::MissingField(field.to_string()))
}

fn join_matches(
    table: &str,
    name: &str,
    on: &[(String, String)],
    row: &Row,
    target: &Row,
) -> DataSourceResult<bool> {
    for (left, right) in on {
        let left = lookup(row, unqualify(table, left))?;
        let right = lookup(target, unqualify(name, right))?;
        if !left.sql_eq(right) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Placeholder for an unmatched LEFT JOIN: every column the joined table is
/// known to have, plus every `name.column` the plan references, set to null.
fn null_row(plan: &QueryPlan, name: &str, targets: &[Row]) -> Row {
    let mut placeholder: Row = targets
        .first()
        .map(|row| row.keys().map(|key| (key, Value::Null)).collect())
        .unwrap_or_default();

    let prefix = format!("{name}.");
    let referenced = plan
        .fields
        .iter()
        .map(String::as_str)
        .chain(plan.group.iter().map(String::as_str))
        .chain(plan.order.iter().map(|key| key.field.as_str()))
        .chain(plan.conditions.iter().map(Predicate::field))
        .chain(plan.having.iter().map(Predicate::field))
        .chain(
            plan.joins
                .iter()
                .flat_map(|join| join.on.iter())
                .flat_map(|(left, right)| [left.as_str(), right.as_str()]),
        );
    for field in referenced {
        let Some(column) = field.strip_prefix(&prefix) else {
            continue;
        };
        let column = column.split_once(' ').map_or(column, |(column, _)| column);
        if column != "*" && !column.contains('.') && !placeholder.contains_key(column) {
            placeholder.insert(column, Value::Null);
        }
    }
    placeholder
}

fn sort_rows(plan: &QueryPlan, rows: Vec<ScanRow>) -> DataSourceResult<Vec<ScanRow>> {
    let keys = plan
        .order
        .iter()
        .map(|key| (unqualify(&plan.table, &key.field), key.direction))
        .collect::<Vec<_>>();

    let mut decorated = rows
        .into_iter()
        .map(|candidate| -> DataSourceResult<(Vec<Value>, ScanRow)> {
            let values = keys
                .iter()
                .map(|(field, _)| lookup(&candidate.row, field).cloned())
                .collect::<Result<Vec<_>, _>>()?;
            Ok((values, candidate))
        })
        .collect::<DataSourceResult<Vec<_>>>()?;

    decorated.sort_by(|(left, _), (right, _)| {
        for (((_, direction), left), right) in keys.iter().zip(left).zip(right) {
            let ordering = match direction {
                SortDirection::Asc => left.sql_cmp(right),
                SortDirection::Desc => right.sql_cmp(left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    Ok(decorated.into_iter().map(|(_, candidate)| candidate).collect())
}

fn project(plan: &QueryPlan, join_names: &[&str], row: Row) -> DataSourceResult<Row> {
    if plan.fields.is_empty() || plan.fields.iter().any(|field| field == "*") {
        return Ok(row);
    }

    let mut projected = Row::new();
    for field in &plan.fields {
        if field.contains('(') || field.contains(char::is_whitespace) {
            return Err(DataSourceError::Unsupported(format!(
                "expression `{field}` cannot be projected by the in-memory engine"
            )));
        }

        let field = unqualify(&plan.table, field);
        if field == "*" {
            for (key, value) in row.iter() {
                if !join_names.contains(&key) {
                    projected.insert(key, value.clone());
                }
            }
            continue;
        }

        match field.split_once('.') {
            Some((qualifier, column)) if join_names.contains(&qualifier) => {
                let nested = lookup(&row, qualifier)?
                    .as_row()
                    .cloned()
                    .unwrap_or_default();
                if column == "*" {
                    projected.sub_row_mut(qualifier).merge(&nested);
                } else {
                    let value = lookup(&nested, column)?.clone();
                    projected.sub_row_mut(qualifier).insert(column, value);
                }
            }
            _ => {
                let value = lookup(&row, field)?.clone();
                projected.insert(field, value);
            }
        }
    }
    Ok(projected)
}

#[cfg(test)]
mod tests {
    use super::MemoryDataSource;
    use crate::model::value::Value;
    use crate::query::query_object::{JoinSpec, QueryObject, SortDirection};
    use crate::row;
    use crate::source::{DataSource, DataSourceError};

    fn seeded() -> MemoryDataSource {
        let mut source = MemoryDataSource::new();
        for (title, score) in [("b", 2), ("a", 3), ("c", 1)] {
            source
                .create("posts", &row! { "title" => title, "score" => score })
                .unwrap();
        }
        source
    }

    #[test]
    fn create_skips_occupied_keys() {
        let mut source = MemoryDataSource::new();
        source.create("posts", &row! { "id" => 2, "title" => "x" }).unwrap();
        source.create("posts", &row! { "id" => 1, "title" => "y" }).unwrap();

        let id = source.create("posts", &row! { "title" => "z" }).unwrap();
        assert_eq!(id, Value::Integer(3));
        assert_eq!(source.last_insert_id(), Some(Value::Integer(3)));
    }

    #[test]
    fn create_fails_once_key_space_is_exhausted() {
        let mut source = MemoryDataSource::new();
        source
            .create("posts", &row! { "id" => i64::MAX, "title" => "last" })
            .unwrap();

        let err = source.create("posts", &row! { "title" => "overflow" }).unwrap_err();
        assert!(matches!(err, DataSourceError::InvalidData(_)));
        assert_eq!(source.rows("posts").len(), 1);
    }

    #[test]
    fn create_rejects_duplicate_explicit_key() {
        let mut source = MemoryDataSource::new().with_primary_key("tags", "slug");
        source.create("tags", &row! { "slug" => "rust" }).unwrap();

        let err = source.create("tags", &row! { "slug" => "rust" }).unwrap_err();
        assert!(matches!(err, DataSourceError::DuplicateKey { .. }));
    }

    #[test]
    fn read_sorts_before_windowing() {
        let source = seeded();
        let mut query = QueryObject::new();
        query
            .add_order("score", SortDirection::Desc)
            .set_limit(2)
            .set_offset(1);

        let rows = source.read("posts", &query).unwrap();
        let titles = rows
            .iter()
            .map(|row| row.get("title").cloned().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec![Value::from("b"), Value::from("c")]);
    }

    #[test]
    fn delete_respects_window() {
        let mut source = seeded();
        let mut query = QueryObject::new();
        query.set_limit(1);

        assert_eq!(source.delete("posts", &query).unwrap(), 1);
        assert_eq!(source.rows("posts").len(), 2);
        assert_eq!(source.rows("posts")[0].get("title"), Some(&Value::from("a")));
    }

    #[test]
    fn right_join_is_unsupported() {
        let source = seeded();
        let mut query = QueryObject::new();
        query.add_join(JoinSpec::right("users").on("author_id", "id"));

        let err = source.read("posts", &query).unwrap_err();
        assert!(matches!(err, DataSourceError::Unsupported(_)));
    }

    #[test]
    fn rollback_restores_snapshot() {
        let mut source = seeded();
        source.begin().unwrap();
        source.delete("posts", &QueryObject::new()).unwrap();
        assert!(source.rows("posts").is_empty());

        source.rollback().unwrap();
        assert_eq!(source.rows("posts").len(), 3);
        assert!(source.begin().is_ok());
        assert!(matches!(
            source.begin().unwrap_err(),
            DataSourceError::Transaction(_)
        ));
    }
}
