//! Transaction scope over a data source.
//!
//! # Responsibility
//! - Open one transaction on creation and finish it exactly once.
//!
//! # Invariants
//! - A unit of work that is dropped without `commit` is rolled back.
//! - A failed `commit` leaves the scope unfinished, so drop rolls it back.

use crate::source::{DataSource, DataSourceResult};
use log::{debug, warn};
use uuid::Uuid;

/// Exclusive transaction scope borrowed from a data source.
pub struct UnitOfWork<'a, D: DataSource + ?Sized> {
    source: &'a mut D,
    id: Uuid,
    finished: bool,
}

impl<'a, D: DataSource + ?Sized> UnitOfWork<'a, D> {
    /// Opens a transaction on `source`.
    pub fn begin(source: &'a mut D) -> DataSourceResult<Self> {
        source.begin()?;
        let id = Uuid::new_v4();
        debug!("event=unit_of_work module=orm status=begin uow_id={id}");
        Ok(Self {
            source,
            id,
            finished: false,
        })
    }

    /// Correlation id attached to this scope's log events.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Data source to run the scoped statements on.
    pub fn source(&mut self) -> &mut D {
        &mut *self.source
    }

    pub fn commit(mut self) -> DataSourceResult<()> {
        self.source.commit()?;
        self.finished = true;
        debug!("event=unit_of_work module=orm status=commit uow_id={}", self.id);
        Ok(())
    }

    pub fn rollback(mut self) -> DataSourceResult<()> {
        self.finished = true;
        self.source.rollback()?;
        debug!("event=unit_of_work module=orm status=rollback uow_id={}", self.id);
        Ok(())
    }
}

impl<D: DataSource + ?Sized> Drop for UnitOfWork<'_, D> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.source.rollback() {
            Ok(()) => debug!(
                "event=unit_of_work module=orm status=rollback uow_id={} reason=dropped",
                self.id
            ),
            Err(err) => warn!(
                "event=unit_of_work module=orm status=error uow_id={} reason=rollback_failed error={}",
                self.id, err
            ),
        }
    }
}
