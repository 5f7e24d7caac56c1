//! Object-relational mapping over any `DataSource`.
//!
//! # Responsibility
//! - Describe tables as `Mapper`s with named relations.
//! - Resolve relations eagerly with one batched query per relation.
//! - Cascade deletes to dependent relations inside one unit of work.
//!
//! # Invariants
//! - Mapper configuration is passed explicitly; there is no global registry.
//! - A missing related row is `null` or an empty list, never an error.

use crate::query::QueryError;
use crate::source::DataSourceError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod manager;
pub mod mapper;
pub mod relation;
pub mod unit_of_work;

pub type OrmResult<T> = Result<T, OrmError>;

/// Errors raised by mapper configuration and entity operations.
#[derive(Debug)]
pub enum OrmError {
    UnknownMapper(String),
    UnknownRelation { mapper: String, relation: String },
    /// Relation descriptor lacks settings its kind requires.
    InvalidRelation {
        mapper: String,
        relation: String,
        message: String,
    },
    DuplicateMapper(String),
    /// `fields` projection drops the key column an eager-loaded relation joins on.
    MissingRelationKey {
        mapper: String,
        relation: String,
        field: String,
    },
    /// Entity passed to `delete` carries no usable primary key value.
    MissingPrimaryKey { mapper: String },
    Source(DataSourceError),
}

impl Display for OrmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownMapper(name) => write!(f, "unknown mapper `{name}`"),
            Self::UnknownRelation { mapper, relation } => {
                write!(f, "mapper `{mapper}` has no relation `{relation}`")
            }
            Self::InvalidRelation {
                mapper,
                relation,
                message,
            } => write!(f, "relation `{mapper}.{relation}` is misconfigured: {message}"),
            Self::DuplicateMapper(name) => write!(f, "mapper `{name}` is already registered"),
            Self::MissingRelationKey {
                mapper,
                relation,
                field,
            } => write!(
                f,
                "relation `{mapper}.{relation}` needs `{field}` in the projected fields"
            ),
            Self::MissingPrimaryKey { mapper } => {
                write!(f, "entity of mapper `{mapper}` has no primary key value")
            }
            Self::Source(err) => write!(f, "{err}"),
        }
    }
}

impl Error for OrmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnknownMapper(_) => None,
            Self::UnknownRelation { .. } => None,
            Self::InvalidRelation { .. } => None,
            Self::DuplicateMapper(_) => None,
            Self::MissingRelationKey { .. } => None,
            Self::MissingPrimaryKey { .. } => None,
            Self::Source(err) => Some(err),
        }
    }
}

impl From<DataSourceError> for OrmError {
    fn from(value: DataSourceError) -> Self {
        Self::Source(value)
    }
}

impl From<QueryError> for OrmError {
    fn from(value: QueryError) -> Self {
        Self::Source(DataSourceError::Query(value))
    }
}
