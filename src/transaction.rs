use std::ops::Deref;

use crate::database::Database;
use crate::error::Result;

/// Scoped transaction on a [`Database`].
///
/// Created by [`Database::transaction`]. Reads and writes go through the
/// database (the guard derefs to it). Dropping the guard without
/// [`Transaction::commit`] rolls the writes back.
pub struct Transaction<'db> {
    db: &'db Database,
    finished: bool,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(db: &'db Database) -> Self {
        Transaction {
            db,
            finished: false,
        }
    }

    /// Apply the transaction's writes atomically.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.db.commit()
    }

    /// Discard the transaction's writes.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.db.rollback()
    }
}

impl Deref for Transaction<'_> {
    type Target = Database;

    fn deref(&self) -> &Database {
        self.db
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        log::warn!("transaction dropped without commit, rolling back");
        if let Err(e) = self.db.rollback() {
            log::warn!("rollback on drop failed: {}", e);
        }
    }
}
