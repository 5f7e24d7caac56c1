//! Uniform CRUD contract and its SQL and in-memory implementations.
//!
//! # Responsibility
//! - Define the `DataSource` surface shared by every storage engine.
//! - Keep engine-specific execution (SQL text, collection scans) behind it.
//!
//! # Invariants
//! - Both implementations return the same rows for the same `QueryObject`
//!   over equivalent data.
//! - Query validation errors surface before any storage work happens.
//! - Backend failures are returned unchanged in meaning; nothing retries.

use crate::db::DbError;
use crate::model::row::{ResultSet, Row};
use crate::model::value::Value;
use crate::query::criteria::CriteriaError;
use crate::query::query_object::QueryObject;
use crate::query::QueryError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod memory_source;
pub mod sql_source;

pub type DataSourceResult<T> = Result<T, DataSourceError>;

/// Errors returned by data source operations.
#[derive(Debug)]
pub enum DataSourceError {
    /// Malformed criteria, options or join configuration.
    Query(QueryError),
    /// Statement failed in the driver.
    Execution {
        sql: String,
        source: rusqlite::Error,
    },
    /// Connection or transaction-control failure.
    Db(DbError),
    /// Insert collided with an existing primary key.
    DuplicateKey { table: String, key: Value },
    /// Operation is valid but not supported by this engine.
    Unsupported(String),
    /// Transaction control was used out of order.
    Transaction(String),
    /// Stored data cannot be mapped back into rows.
    InvalidData(String),
}

impl Display for DataSourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query(err) => write!(f, "{err}"),
            Self::Execution { sql, source } => {
                write!(f, "statement failed: {source}; sql: {sql}")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::DuplicateKey { table, key } => {
                write!(f, "duplicate primary key `{key}` in `{table}`")
            }
            Self::Unsupported(message) => write!(f, "unsupported operation: {message}"),
            Self::Transaction(message) => write!(f, "transaction error: {message}"),
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
        }
    }
}

impl Error for DataSourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Query(err) => Some(err),
            Self::Execution { source, .. } => Some(source),
            Self::Db(err) => Some(err),
            Self::DuplicateKey { .. } => None,
            Self::Unsupported(_) => None,
            Self::Transaction(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<QueryError> for DataSourceError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

impl From<CriteriaError> for DataSourceError {
    fn from(value: CriteriaError) -> Self {
        Self::Query(QueryError::Criteria(value))
    }
}

impl From<DbError> for DataSourceError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// CRUD surface implemented identically by every storage engine.
///
/// Transaction control is part of the contract so callers can scope a
/// group of writes (see `orm::UnitOfWork`).
pub trait DataSource {
    /// Persists one row and returns its primary key.
    ///
    /// The same key is available afterwards from [`DataSource::last_insert_id`].
    fn create(&mut self, table: &str, data: &Row) -> DataSourceResult<Value>;
    /// Key assigned by the most recent successful `create`.
    fn last_insert_id(&self) -> Option<Value>;
    /// Returns rows matching criteria, projection, joins, grouping, order and window.
    fn read(&self, table: &str, query: &QueryObject) -> DataSourceResult<ResultSet>;
    /// Updates the rows `read` would return; returns the affected count.
    fn update(&mut self, table: &str, query: &QueryObject, data: &Row) -> DataSourceResult<u64>;
    /// Deletes the rows `read` would return; returns the affected count.
    fn delete(&mut self, table: &str, query: &QueryObject) -> DataSourceResult<u64>;
    /// Counts matching rows (or groups when `group` is set).
    fn count(&self, table: &str, query: &QueryObject) -> DataSourceResult<u64>;
    /// Opens a transaction.
    fn begin(&mut self) -> DataSourceResult<()>;
    /// Commits the open transaction.
    fn commit(&mut self) -> DataSourceResult<()>;
    /// Discards every change since `begin`.
    fn rollback(&mut self) -> DataSourceResult<()>;
}

impl<D: DataSource + ?Sized> DataSource for &mut D {
    fn create(&mut self, table: &str, data: &Row) -> DataSourceResult<Value> {
        (**self).create(table, data)
    }

    fn last_insert_id(&self) -> Option<Value> {
        (**self).last_insert_id()
    }

    fn read(&self, table: &str, query: &QueryObject) -> DataSourceResult<ResultSet> {
        (**self).read(table, query)
    }

    fn update(&mut self, table: &str, query: &QueryObject, data: &Row) -> DataSourceResult<u64> {
        (**self).update(table, query, data)
    }

    fn delete(&mut self, table: &str, query: &QueryObject) -> DataSourceResult<u64> {
        (**self).delete(table, query)
    }

    fn count(&self, table: &str, query: &QueryObject) -> DataSourceResult<u64> {
        (**self).count(table, query)
    }

    fn begin(&mut self) -> DataSourceResult<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> DataSourceResult<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> DataSourceResult<()> {
        (**self).rollback()
    }
}
