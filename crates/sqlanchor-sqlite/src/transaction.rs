//! Scoped transaction frames.

use sqlanchor_core::{Error, Result};
use tracing::error;

use crate::connection::DatabaseConnection;

/// A scoped transaction frame on a [`DatabaseConnection`].
///
/// Construction begins a frame (the outermost issues `begin`, inner ones a
/// savepoint). The frame must be resolved by calling
/// [`commit`](Self::commit) or [`cancel`](Self::cancel), both of which
/// consume the scope; a scope that is simply dropped rolls its frame back.
///
/// Frames nest: a scope created while another is active affects only its
/// own savepoint, so an inner cancel leaves the outer frame's writes
/// intact, and an outer cancel discards everything the inner frames
/// committed.
///
/// If the engine call underlying `commit` or `cancel` fails, the error is
/// [`Error::UnresolvedTransaction`]: the frame will still be rolled back,
/// but the caller should end the session, since further transactions may
/// jeopardize that rollback.
pub struct TransactionScope<'conn> {
    connection: &'conn DatabaseConnection,
    active: bool,
}

impl<'conn> TransactionScope<'conn> {
    /// Begin a transaction frame.
    pub fn new(connection: &'conn DatabaseConnection) -> Result<Self> {
        connection.begin_transaction()?;
        Ok(Self {
            connection,
            active: true,
        })
    }

    /// Commit the frame.
    ///
    /// On failure the scope stays responsible for the frame and rolls it
    /// back as it drops, then reports `UnresolvedTransaction`.
    pub fn commit(mut self) -> Result<()> {
        match self.connection.end_transaction() {
            Ok(()) => {
                self.active = false;
                Ok(())
            }
            Err(_) => Err(Error::UnresolvedTransaction),
        }
    }

    /// Roll the frame back explicitly.
    pub fn cancel(mut self) -> Result<()> {
        self.active = false;
        self.connection
            .cancel_transaction()
            .map_err(|_| Error::UnresolvedTransaction)
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.connection.cancel_transaction() {
                // Drop must not fail; the engine will roll the frame back
                // when the connection closes.
                error!(error = %e, "could not roll back transaction frame in drop");
            }
        }
    }
}
