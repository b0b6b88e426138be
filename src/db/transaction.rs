//! Scoped transactions over one pooled connection.
//!
//! `TransactionScope` owns the connection from BEGIN until it is released. Each
//! exit path of [`PoolProvider::with_transaction`](crate::db::PoolProvider::with_transaction)
//! resolves the transaction and releases the connection exactly once; if the
//! scope is dropped early (panic inside the work, cancelled future) the
//! connection is dropped instead, which discards it rather than reusing it.

use crate::db::pool::PoolConnection;
use crate::error::{DbError, DbResult};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeState {
    Idle,
    Begun,
    Resolved,
}

/// RAII guard around a connection taking part in a transaction.
pub struct TransactionScope {
    conn: Option<Box<dyn PoolConnection>>,
    state: ScopeState,
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("state", &self.state)
            .field("holds_connection", &self.conn.is_some())
            .finish()
    }
}

impl TransactionScope {
    pub fn new(conn: Box<dyn PoolConnection>) -> Self {
        Self {
            conn: Some(conn),
            state: ScopeState::Idle,
        }
    }

    fn live(&mut self) -> DbResult<&mut Box<dyn PoolConnection>> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::internal("transaction scope already released"))
    }

    /// Issue BEGIN.
    pub async fn begin(&mut self) -> DbResult<()> {
        self.live()?.begin().await?;
        self.state = ScopeState::Begun;
        debug!("Transaction started");
        Ok(())
    }

    /// The connection the caller's work runs on.
    pub fn connection(&mut self) -> DbResult<&mut dyn PoolConnection> {
        Ok(&mut **self.live()?)
    }

    /// Issue COMMIT.
    ///
    /// On failure the scope stays `Begun` so the caller can still roll back.
    pub async fn commit(&mut self) -> DbResult<()> {
        self.live()?.commit().await?;
        self.state = ScopeState::Resolved;
        debug!("Transaction committed");
        Ok(())
    }

    /// Issue ROLLBACK, logging instead of returning any failure.
    pub async fn rollback_quietly(&mut self) {
        if self.state != ScopeState::Begun {
            return;
        }
        self.state = ScopeState::Resolved;
        let result = match self.live() {
            Ok(conn) => conn.rollback().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!("Transaction rolled back"),
            Err(e) => warn!(error = %e, "Rollback failed; original error is preserved"),
        }
    }

    /// Hand the connection back to its pool.
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            conn.release().await;
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.conn.is_some() {
            warn!(
                state = ?self.state,
                "Transaction scope dropped without release; dropping connection"
            );
        }
    }
}
