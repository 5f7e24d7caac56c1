//! Query description, criteria evaluation and SQL compilation.
//!
//! # Responsibility
//! - Describe queries independently of the executing engine (`QueryObject`).
//! - Parse criteria into typed predicates usable by SQL and in-memory engines.
//! - Compile validated plans into parameterized SQL.
//!
//! # Invariants
//! - Every error here is raised before any backend call is made.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod builder;
pub mod criteria;
pub mod plan;
pub mod query_object;

use criteria::CriteriaError;

pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while validating or compiling a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Malformed criteria or `having` entry.
    Criteria(CriteriaError),
    /// Join descriptor is missing `table`/`type` or is wrongly shaped.
    InvalidJoin(String),
    /// Join `type` is not one of `left|right|full|inner`.
    UnsupportedJoinType(String),
    /// Recognized option carries a value of the wrong shape.
    InvalidOption { key: &'static str, message: String },
    /// Table/collection name is blank.
    EmptyTable,
    /// Write data carries a list/map value that cannot be stored in a column.
    UnsupportedValue {
        field: String,
        type_name: &'static str,
    },
    /// Update was requested without any field to set.
    EmptyData,
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Criteria(err) => write!(f, "{err}"),
            Self::InvalidJoin(message) => write!(f, "invalid join configuration: {message}"),
            Self::UnsupportedJoinType(token) => write!(
                f,
                "unsupported join type `{token}`; expected left|right|full|inner"
            ),
            Self::InvalidOption { key, message } => {
                write!(f, "invalid `{key}` option: {message}")
            }
            Self::EmptyTable => write!(f, "table name cannot be empty"),
            Self::UnsupportedValue { field, type_name } => {
                write!(f, "field `{field}` cannot store a {type_name} value")
            }
            Self::EmptyData => write!(f, "update requires at least one field"),
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Criteria(err) => Some(err),
            Self::InvalidJoin(_) => None,
            Self::UnsupportedJoinType(_) => None,
            Self::InvalidOption { .. } => None,
            Self::EmptyTable => None,
            Self::UnsupportedValue { .. } => None,
            Self::EmptyData => None,
        }
    }
}

impl From<CriteriaError> for QueryError {
    fn from(value: CriteriaError) -> Self {
        Self::Criteria(value)
    }
}
