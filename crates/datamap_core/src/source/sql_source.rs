//! SQLite-backed data source.
//!
//! # Responsibility
//! - Compile `QueryObject`s through `QueryBuilder` and execute them as
//!   prepared statements with named parameters.
//! - Map result columns back into nested rows by their `table.column` labels.
//!
//! # Invariants
//! - Query validation runs before any statement is prepared.
//! - Columns of the primary table land at the top level of each row; columns
//!   of joined tables are nested under the join's alias (or table name);
//!   unlabeled columns (aggregates, aliases) stay top-level.
//! - Windowed UPDATE/DELETE address rows by `rowid`, so target tables must
//!   be ordinary rowid tables.

use crate::db::dialect::{Dialect, SqliteDialect};
use crate::db::DbError;
use crate::model::row::{ResultSet, Row};
use crate::model::value::Value;
use crate::query::builder::{CompiledQuery, QueryBuilder};
use crate::query::plan::QueryPlan;
use crate::query::query_object::QueryObject;
use crate::source::{DataSource, DataSourceError, DataSourceResult};
use log::{debug, trace};
use rusqlite::types::ToSql;
use rusqlite::Connection;
use std::collections::HashMap;
use std::time::Instant;

const DEFAULT_PRIMARY_KEY: &str = "id";

/// Data source executing compiled SQL on a borrowed SQLite connection.
pub struct SqlDataSource<'conn> {
    conn: &'conn Connection,
    dialect: SqliteDialect,
    primary_keys: HashMap<String, String>,
    last_insert_id: Option<Value>,
}

impl<'conn> SqlDataSource<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            dialect: SqliteDialect,
            primary_keys: HashMap::new(),
            last_insert_id: None,
        }
    }

    /// Uses `field` instead of `id` as the key `create` reports for `table`.
    pub fn with_primary_key(mut self, table: impl Into<String>, field: impl Into<String>) -> Self {
        self.primary_keys.insert(table.into(), field.into());
        self
    }

    fn primary_key(&self, table: &str) -> &str {
        self.primary_keys
            .get(table)
            .map(String::as_str)
            .unwrap_or(DEFAULT_PRIMARY_KEY)
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }

    fn builder(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.dialect)
    }

    fn plan(&self, table: &str, query: &QueryObject) -> DataSourceResult<QueryPlan> {
        Ok(QueryPlan::from_query(table, query)?)
    }

    /// Replaces `*` and `name.*` projections with explicit labeled columns so
    /// every result column can be traced back to its table.
    fn expand_fields(&self, plan: &mut QueryPlan) -> DataSourceResult<()> {
        let requested = if plan.fields.is_empty() {
            vec!["*".to_string()]
        } else {
            plan.fields.clone()
        };
        if !requested.iter().any(|field| field.ends_with('*')) {
            return Ok(());
        }

        let mut expanded = Vec::new();
        for field in requested {
            if field == "*" {
                for column in self.table_columns(&plan.table)? {
                    expanded.push(column);
                }
                for join in &plan.joins {
                    for column in self.table_columns(&join.table)? {
                        expanded.push(format!("{}.{column}", join.name()));
                    }
                }
                continue;
            }

            let Some(qualifier) = field.strip_suffix(".*") else {
                expanded.push(field);
                continue;
            };
            let source_table = if qualifier == plan.table {
                Some(plan.table.clone())
            } else {
                plan.joins
                    .iter()
                    .find(|join| join.name() == qualifier)
                    .map(|join| join.table.clone())
            };
            match source_table {
                Some(source_table) => {
                    for column in self.table_columns(&source_table)? {
                        expanded.push(format!("{qualifier}.{column}"));
                    }
                }
                None => expanded.push(field),
            }
        }

        if !expanded.is_empty() {
            plan.fields = expanded;
        }
        Ok(())
    }

    fn table_columns(&self, table: &str) -> DataSourceResult<Vec<String>> {
        let sql = format!("PRAGMA table_info({});", self.dialect.quote_identifier(table));
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|err| execution_error(&sql, err))?;
        let mut rows = stmt.query([]).map_err(|err| execution_error(&sql, err))?;

        let mut columns = Vec::new();
        while let Some(row) = rows.next().map_err(|err| execution_error(&sql, err))? {
            let name: String = row.get(1).map_err(|err| execution_error(&sql, err))?;
            columns.push(name);
        }
        Ok(columns)
    }

    fn query_rows(&self, compiled: &CompiledQuery) -> DataSourceResult<(Vec<String>, Vec<Vec<Value>>)> {
        let started_at = Instant::now();
        trace!("event=sql_prepare module=source sql={}", compiled.sql);

        let mut stmt = self
            .conn
            .prepare(&compiled.sql)
            .map_err(|err| execution_error(&compiled.sql, err))?;
        let columns = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let params = named_params(compiled);
        let mut rows = stmt
            .query(params.as_slice())
            .map_err(|err| execution_error(&compiled.sql, err))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| execution_error(&compiled.sql, err))?
        {
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                let value = row
                    .get_ref(index)
                    .map_err(|err| execution_error(&compiled.sql, err))?;
                values.push(Value::from(value));
            }
            records.push(values);
        }

        debug!(
            "event=sql_query module=source status=ok params={} rows={} duration_ms={}",
            compiled.params.len(),
            records.len(),
            started_at.elapsed().as_millis()
        );
        Ok((columns, records))
    }

    fn execute(&self, compiled: &CompiledQuery) -> DataSourceResult<u64> {
        let started_at = Instant::now();
        trace!("event=sql_prepare module=source sql={}", compiled.sql);

        let mut stmt = self
            .conn
            .prepare(&compiled.sql)
            .map_err(|err| execution_error(&compiled.sql, err))?;
        let params = named_params(compiled);
        let changed = stmt
            .execute(params.as_slice())
            .map_err(|err| execution_error(&compiled.sql, err))?;

        debug!(
            "event=sql_execute module=source status=ok params={} changed={} duration_ms={}",
            compiled.params.len(),
            changed,
            started_at.elapsed().as_millis()
        );
        Ok(changed as u64)
    }

    fn control(&self, statement: &str) -> DataSourceResult<()> {
        self.conn
            .execute_batch(statement)
            .map_err(|err| DataSourceError::Db(DbError::Sqlite(err)))?;
        debug!("event=sql_transaction module=source status=ok statement={statement}");
        Ok(())
    }
}

impl DataSource for SqlDataSource<'_> {
    fn create(&mut self, table: &str, data: &Row) -> DataSourceResult<Value> {
        let compiled = self.builder().insert(table, data)?;
        self.execute(&compiled)?;

        // A caller-supplied key takes precedence over the rowid.
        let id = data
            .get(self.primary_key(table))
            .filter(|value| !value.is_null())
            .cloned()
            .unwrap_or_else(|| Value::Integer(self.conn.last_insert_rowid()));
        self.last_insert_id = Some(id.clone());
        Ok(id)
    }

    fn last_insert_id(&self) -> Option<Value> {
        self.last_insert_id.clone()
    }

    fn read(&self, table: &str, query: &QueryObject) -> DataSourceResult<ResultSet> {
        let mut plan = self.plan(table, query)?;
        self.expand_fields(&mut plan)?;

        let compiled = self.builder().select(&plan);
        let (columns, records) = self.query_rows(&compiled)?;
        let rows = records
            .into_iter()
            .map(|values| map_row(&plan.table, &columns, values))
            .collect::<Vec<_>>();
        Ok(ResultSet::new(rows))
    }

    fn update(&mut self, table: &str, query: &QueryObject, data: &Row) -> DataSourceResult<u64> {
        let plan = self.plan(table, query)?;
        let compiled = self.builder().update(&plan, data)?;
        self.execute(&compiled)
    }

    fn delete(&mut self, table: &str, query: &QueryObject) -> DataSourceResult<u64> {
        let plan = self.plan(table, query)?;
        let compiled = self.builder().delete(&plan);
        self.execute(&compiled)
    }

    fn count(&self, table: &str, query: &QueryObject) -> DataSourceResult<u64> {
        let plan = self.plan(table, query)?;
        let compiled = self.builder().count(&plan);
        let (_, records) = self.query_rows(&compiled)?;

        let value = records
            .first()
            .and_then(|values| values.first())
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                DataSourceError::InvalidData(format!(
                    "count query returned no scalar; sql: {}",
                    compiled.sql
                ))
            })?;
        Ok(value.max(0) as u64)
    }

    fn begin(&mut self) -> DataSourceResult<()> {
        self.control("BEGIN IMMEDIATE;")
    }

    fn commit(&mut self) -> DataSourceResult<()> {
        self.control("COMMIT;")
    }

    fn rollback(&mut self) -> DataSourceResult<()> {
        self.control("ROLLBACK;")
    }
}

/// Groups `table.column` labels: the primary table's columns go top-level,
/// other qualifiers become nested sub-rows.
fn map_row(primary_table: &str, columns: &[String], values: Vec<Value>) -> Row {
    let mut row = Row::with_capacity(columns.len());
    for (label, value) in columns.iter().zip(values) {
        match label.split_once('.') {
            Some((qualifier, column)) if qualifier == primary_table => {
                row.insert(column, value);
            }
            Some((qualifier, column)) => {
                row.sub_row_mut(qualifier).insert(column, value);
            }
            None => {
                row.insert(label.as_str(), value);
            }
        }
    }
    row
}

fn named_params(compiled: &CompiledQuery) -> Vec<(&str, &dyn ToSql)> {
    compiled
        .params
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

fn execution_error(sql: &str, source: rusqlite::Error) -> DataSourceError {
    DataSourceError::Execution {
        sql: sql.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::map_row;
    use crate::model::value::Value;

    #[test]
    fn map_row_nests_foreign_columns_and_keeps_bare_labels() {
        let columns = vec![
            "posts.id".to_string(),
            "author.name".to_string(),
            "total".to_string(),
        ];
        let row = map_row(
            "posts",
            &columns,
            vec![Value::Integer(1), Value::from("ada"), Value::Integer(3)],
        );

        assert_eq!(row.get("id"), Some(&Value::Integer(1)));
        assert_eq!(row.lookup("author.name"), Some(&Value::from("ada")));
        assert_eq!(row.get("total"), Some(&Value::Integer(3)));
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["id", "author", "total"]);
    }
}
