//! Connection pool abstraction.
//!
//! `ConnectionPool` and `PoolConnection` are the two seams the provider talks
//! through. `PgConnectionPool` is the production implementation over a lazily
//! connecting sqlx `PgPool`; tests substitute their own pools via
//! `PoolProvider::set_override_pool`.

use crate::config::{ConnectionSettings, TransportSecurity};
use crate::db::params::{QueryParam, build_postgres_query};
use crate::db::types::{JsonRow, RowToJson};
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::pool::PoolConnection as SqlxPoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::Postgres;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared handle to whichever pool is currently in effect.
pub type SharedPool = Arc<dyn ConnectionPool>;

/// A set of reusable database connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync + fmt::Debug {
    /// Check out one connection.
    ///
    /// Suspends until a connection is free; fails with `DbError::PoolExhausted`
    /// once the pool's acquire timeout elapses.
    async fn acquire(&self) -> DbResult<Box<dyn PoolConnection>>;

    /// Terminate every connection owned by the pool.
    async fn close(&self) -> DbResult<()>;

    fn is_closed(&self) -> bool;
}

/// One connection checked out of a pool.
///
/// Must be handed back with [`PoolConnection::release`]. Dropping it without
/// releasing is allowed but implementations may close it instead of reusing it.
#[async_trait]
pub trait PoolConnection: Send {
    /// Execute a statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64>;

    /// Run a query and decode every returned row.
    async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>>;

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<JsonRow>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.execute("BEGIN", &[]).await.map(drop)
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.execute("COMMIT", &[]).await.map(drop)
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.execute("ROLLBACK", &[]).await.map(drop)
    }

    /// Return the connection to its pool.
    async fn release(self: Box<Self>);
}

/// Production pool backed by sqlx.
#[derive(Debug, Clone)]
pub struct PgConnectionPool {
    pool: PgPool,
}

impl PgConnectionPool {
    /// Build a pool without opening any connection.
    ///
    /// The first connection is made by the first `acquire`. Must be called from
    /// within a tokio runtime.
    pub fn connect_lazy(settings: &ConnectionSettings) -> DbResult<Self> {
        let options = Self::connect_options(settings)?;
        let pool_opts = &settings.pool_options;

        let pool = PgPoolOptions::new()
            .min_connections(pool_opts.min_connections_or_default())
            .max_connections(pool_opts.max_connections_or_default())
            .acquire_timeout(pool_opts.acquire_timeout())
            .idle_timeout(Some(pool_opts.idle_timeout()))
            .test_before_acquire(pool_opts.test_before_acquire_or_default())
            .connect_lazy_with(options);

        Ok(Self { pool })
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    fn connect_options(settings: &ConnectionSettings) -> DbResult<PgConnectOptions> {
        let options = PgConnectOptions::from_str(&settings.connection_string).map_err(|e| {
            DbError::configuration(format!("Invalid PostgreSQL connection string: {e}"))
        })?;

        Ok(match settings.security {
            TransportSecurity::Inherit => options,
            TransportSecurity::Encrypted {
                verify_certificates: true,
            } => options.ssl_mode(PgSslMode::VerifyFull),
            TransportSecurity::Encrypted {
                verify_certificates: false,
            } => options.ssl_mode(PgSslMode::Require),
        })
    }
}

#[async_trait]
impl ConnectionPool for PgConnectionPool {
    async fn acquire(&self) -> DbResult<Box<dyn PoolConnection>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgPoolConnection {
            conn: Some(conn),
            tx: TxState::default(),
        }))
    }

    async fn close(&self) -> DbResult<()> {
        self.pool.close().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// Transaction bookkeeping for one checked-out connection.
///
/// A BEGIN gets at most one ROLLBACK. If that ROLLBACK fails the connection
/// state is unknown and it must be discarded, not rolled back again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TxState {
    in_transaction: bool,
    rollback_attempted: bool,
}

impl TxState {
    fn begun(&mut self) {
        *self = Self {
            in_transaction: true,
            rollback_attempted: false,
        };
    }

    fn resolved(&mut self) {
        *self = Self::default();
    }

    fn rollback_sent(&mut self, ok: bool) {
        self.rollback_attempted = true;
        if ok {
            self.in_transaction = false;
        }
    }

    fn should_rollback_on_release(&self) -> bool {
        self.in_transaction && !self.rollback_attempted
    }

    fn must_discard(&self) -> bool {
        self.in_transaction
    }
}

/// Connection checked out of a [`PgConnectionPool`].
pub struct PgPoolConnection {
    conn: Option<SqlxPoolConnection<Postgres>>,
    tx: TxState,
}

impl PgPoolConnection {
    fn live(&mut self) -> DbResult<&mut SqlxPoolConnection<Postgres>> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::internal("connection already released"))
    }
}

#[async_trait]
impl PoolConnection for PgPoolConnection {
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let conn = self.live()?;
        let result = build_postgres_query(sql, params)
            .execute(&mut **conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        let conn = self.live()?;
        let rows = build_postgres_query(sql, params)
            .fetch_all(&mut **conn)
            .await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.execute("BEGIN", &[]).await?;
        self.tx.begun();
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.execute("COMMIT", &[]).await?;
        self.tx.resolved();
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let result = self.execute("ROLLBACK", &[]).await;
        self.tx.rollback_sent(result.is_ok());
        result.map(drop)
    }

    async fn release(mut self: Box<Self>) {
        if self.tx.should_rollback_on_release() {
            if let Err(e) = self.rollback().await {
                warn!(error = %e, "Rollback before release failed");
            }
        }
        if !self.tx.must_discard() {
            // Dropping a sqlx pool connection hands it back to the pool.
            self.conn.take();
        }
        // Otherwise Drop detaches it.
    }
}

impl Drop for PgPoolConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.tx.must_discard() {
                // Never return a connection with an open transaction to the pool.
                debug!("Discarding connection left inside a transaction");
                drop(conn.detach());
            }
        }
    }
}
