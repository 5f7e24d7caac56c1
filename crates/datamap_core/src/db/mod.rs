//! SQLite connection bootstrap and dialect helpers.
//!
//! # Responsibility
//! - Open and configure SQLite connections used by `SqlDataSource`.
//! - Provide dialect fragments (quoting, FK toggles, truncation).
//!
//! # Invariants
//! - Returned connections have the configured `foreign_keys` and
//!   `busy_timeout` pragmas applied before first use.
//! - Schema creation is the caller's concern; nothing here migrates tables.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub mod dialect;
mod open;

pub use open::{open_db, open_db_in_memory, open_db_in_memory_with, open_db_with};

pub type DbResult<T> = Result<T, DbError>;

/// Connection-level failure reported by the SQLite driver.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Pragmas applied when a connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Enforce declared foreign keys (`PRAGMA foreign_keys`).
    pub foreign_keys: bool,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            foreign_keys: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}
