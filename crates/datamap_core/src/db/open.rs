//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Apply `ConnectionConfig` pragmas before handing the connection out.
//!
//! # Invariants
//! - A connection is only returned once every pragma has been applied.

use super::{ConnectionConfig, DbResult};
use log::debug;
use rusqlite::Connection;
use std::path::Path;
use std::time::Instant;

/// Opens a SQLite database file with the default configuration.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_db_with(path, &ConnectionConfig::default())
}

/// Opens a SQLite database file with `config`.
///
/// # Side effects
/// - Emits `db_open` debug events with duration and status.
pub fn open_db_with(path: impl AsRef<Path>, config: &ConnectionConfig) -> DbResult<Connection> {
    let started_at = Instant::now();
    debug!("event=db_open module=db status=start mode=file");

    let conn = Connection::open(path)?;
    configure_connection(&conn, config)?;

    debug!(
        "event=db_open module=db status=ok mode=file duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(conn)
}

/// Opens an in-memory SQLite database with the default configuration.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_db_in_memory_with(&ConnectionConfig::default())
}

/// Opens an in-memory SQLite database with `config`.
pub fn open_db_in_memory_with(config: &ConnectionConfig) -> DbResult<Connection> {
    let started_at = Instant::now();
    debug!("event=db_open module=db status=start mode=memory");

    let conn = Connection::open_in_memory()?;
    configure_connection(&conn, config)?;

    debug!(
        "event=db_open module=db status=ok mode=memory duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(conn)
}

fn configure_connection(conn: &Connection, config: &ConnectionConfig) -> DbResult<()> {
    let foreign_keys = if config.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(config.busy_timeout)?;
    Ok(())
}
