//! Backend-agnostic data access: query descriptors, a criteria engine shared
//! by SQL and in-memory storage, and a relation-aware entity mapper.

pub mod db;
pub mod logging;
pub mod model;
pub mod orm;
pub mod query;
pub mod source;

pub use db::dialect::{Dialect, SqliteDialect};
pub use db::{
    open_db, open_db_in_memory, open_db_in_memory_with, open_db_with, ConnectionConfig, DbError,
    DbResult,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::row::{ResultSet, Row};
pub use model::value::Value;
pub use orm::manager::{EntityManager, Repository};
pub use orm::mapper::{Mapper, MapperRegistry};
pub use orm::relation::{RelationDescriptor, RelationKind};
pub use orm::unit_of_work::UnitOfWork;
pub use orm::{OrmError, OrmResult};
pub use query::builder::{CompiledQuery, QueryBuilder};
pub use query::criteria::{CriteriaError, CriteriaResult, Operator, Predicate};
pub use query::plan::QueryPlan;
pub use query::query_object::{JoinSpec, QueryObject, SortDirection};
pub use query::{QueryError, QueryResult};
pub use source::memory_source::MemoryDataSource;
pub use source::sql_source::SqlDataSource;
pub use source::{DataSource, DataSourceError, DataSourceResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
