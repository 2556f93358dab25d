//! Transactions bound to a single borrowed connection, with savepoints.
//!
//! A transaction holds an exclusive `&mut` borrow of its connection, so
//! concurrent statement submission on the same connection is impossible
//! by construction. Statements run through the transaction via `Deref`
//! to the connection; on any statement failure inside the transaction
//! the session is flagged aborted and only rollback can finish it.

use std::ops::Deref;
use std::time::Instant;

use crate::error::Error;
use crate::pool::AgeConnection;
use crate::staging::check_identifier;

/// An open transaction on a borrowed connection.
///
/// Must be finished with [`commit`](AgeTransaction::commit) or
/// [`rollback`](AgeTransaction::rollback). Dropping an unfinished
/// transaction logs a warning and flags the session: the pool rolls it
/// back before any reuse.
pub struct AgeTransaction<'a> {
    conn: &'a mut AgeConnection,
    /// Active savepoints, oldest first.
    savepoints: Vec<String>,
    deadline: Option<Instant>,
    finished: bool,
}

impl AgeConnection {
    /// Begins a transaction, taking exclusive use of this connection
    /// until commit or rollback.
    pub async fn begin(&mut self) -> Result<AgeTransaction<'_>, Error> {
        if self.session().in_transaction() {
            return Err(Error::Transaction(
                "a transaction is already active on this connection".into(),
            ));
        }

        self.raw_sql("BEGIN", &[])
            .await
            .map_err(|e| Error::Transaction(format!("failed to begin: {}", e)))?;

        let deadline = self
            .settings()
            .transaction_timeout
            .map(|t| Instant::now() + t);
        self.session().set_in_transaction(true);

        Ok(AgeTransaction {
            conn: self,
            savepoints: Vec::new(),
            deadline,
            finished: false,
        })
    }
}

impl<'a> AgeTransaction<'a> {
    fn check_open(&self) -> Result<(), Error> {
        if self.finished {
            return Err(Error::Transaction(
                "transaction has already been completed".into(),
            ));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(Error::Transaction("transaction timeout exceeded".into()));
            }
        }
        Ok(())
    }

    /// Creates a savepoint. Reusing a name while it is active is a
    /// programming error.
    pub async fn savepoint(&mut self, name: &str) -> Result<(), Error> {
        self.check_open()?;
        check_identifier(name, "savepoint name")?;
        if self.savepoints.iter().any(|s| s == name) {
            return Err(Error::Transaction(format!(
                "savepoint '{}' is already active",
                name
            )));
        }

        self.conn
            .raw_sql(&format!("SAVEPOINT {}", name), &[])
            .await
            .map_err(|e| Error::Transaction(format!("failed to create savepoint '{}': {}", name, e)))?;
        self.savepoints.push(name.to_string());
        Ok(())
    }

    /// Releases a savepoint. Savepoints created after it are released
    /// with it, matching the server's semantics.
    pub async fn release_savepoint(&mut self, name: &str) -> Result<(), Error> {
        self.check_open()?;
        let position = self.position_of(name)?;

        self.conn
            .raw_sql(&format!("RELEASE SAVEPOINT {}", name), &[])
            .await
            .map_err(|e| {
                Error::Transaction(format!("failed to release savepoint '{}': {}", name, e))
            })?;
        self.savepoints.truncate(position);
        Ok(())
    }

    /// Rolls back to a savepoint; the savepoint itself stays active,
    /// later ones are destroyed.
    pub async fn rollback_to(&mut self, name: &str) -> Result<(), Error> {
        self.check_open()?;
        let position = self.position_of(name)?;

        self.conn
            .raw_sql(&format!("ROLLBACK TO SAVEPOINT {}", name), &[])
            .await
            .map_err(|e| {
                Error::Transaction(format!("failed to roll back to savepoint '{}': {}", name, e))
            })?;
        self.savepoints.truncate(position + 1);
        // Rolling back to a savepoint clears the aborted state
        self.conn.session().clear_txn_aborted();
        Ok(())
    }

    fn position_of(&self, name: &str) -> Result<usize, Error> {
        check_identifier(name, "savepoint name")?;
        self.savepoints
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| Error::Transaction(format!("savepoint '{}' is not active", name)))
    }

    /// Names of currently active savepoints, oldest first.
    pub fn active_savepoints(&self) -> &[String] {
        &self.savepoints
    }

    /// Commits the transaction. A commit failure is surfaced and the
    /// transaction is treated as rolled back.
    pub async fn commit(mut self) -> Result<(), Error> {
        self.check_open()?;

        if self.conn.session().txn_aborted() {
            // The server already aborted this transaction; COMMIT would
            // silently roll back. Surface that instead.
            let _ = self.conn.raw_sql("ROLLBACK", &[]).await;
            self.finish_state();
            return Err(Error::Transaction(
                "cannot commit: a statement failed inside this transaction".into(),
            ));
        }

        let result = self.conn.raw_sql("COMMIT", &[]).await;
        self.finish_state();
        result.map_err(|e| {
            Error::Transaction(format!("commit failed, transaction rolled back: {}", e))
        })?;
        Ok(())
    }

    /// Rolls back the transaction. If the rollback itself fails the
    /// session is marked broken and the pool recycles it.
    pub async fn rollback(mut self) -> Result<(), Error> {
        if self.finished {
            return Err(Error::Transaction(
                "transaction has already been completed".into(),
            ));
        }

        let result = self.conn.raw_sql("ROLLBACK", &[]).await;
        self.finish_state();
        if let Err(e) = result {
            self.conn.session().mark_error();
            return Err(Error::Transaction(format!("rollback failed: {}", e)));
        }
        Ok(())
    }

    fn finish_state(&mut self) {
        self.finished = true;
        self.savepoints.clear();
        let session = self.conn.session();
        session.set_in_transaction(false);
        session.clear_txn_aborted();
    }
}

impl Deref for AgeTransaction<'_> {
    type Target = AgeConnection;

    fn deref(&self) -> &AgeConnection {
        self.conn
    }
}

impl Drop for AgeTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                "transaction dropped without commit or rollback; session will be rolled back before reuse"
            );
            let session = self.conn.session();
            session.set_needs_rollback();
            session.set_in_transaction(false);
            session.clear_txn_aborted();
        }
    }
}

#[cfg(test)]
mod tests {
    // Transaction behavior requires a live session; see the integration
    // suite. Savepoint bookkeeping is exercised there as well because
    // every operation round-trips to the server.
}
