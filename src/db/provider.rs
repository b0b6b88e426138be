//! Pool provider: lazy pool lifecycle, override seam and scoped transactions.
//!
//! A `PoolProvider` is created once at startup and cloned into whatever needs
//! database access (HTTP state, services). Clones share the same slots, so the
//! internal pool is built at most once between resets no matter how many
//! handles ask for it concurrently.

use crate::config::DatabaseConfig;
use crate::db::pool::{PgConnectionPool, PoolConnection, SharedPool};
use crate::db::transaction::TransactionScope;
use crate::error::{DbError, DbResult};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct PoolSlots {
    internal: Option<SharedPool>,
    override_pool: Option<SharedPool>,
}

impl PoolSlots {
    fn current(&self) -> Option<SharedPool> {
        self.override_pool
            .as_ref()
            .or(self.internal.as_ref())
            .map(Arc::clone)
    }
}

/// Which pools a provider currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub internal_created: bool,
    pub overridden: bool,
}

/// Owner of the process's database pool.
#[derive(Debug, Clone)]
pub struct PoolProvider {
    config: Arc<DatabaseConfig>,
    slots: Arc<RwLock<PoolSlots>>,
}

impl PoolProvider {
    /// Create a provider. Nothing is validated or connected until the first
    /// call to [`get_pool`](Self::get_pool).
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config: Arc::new(config),
            slots: Arc::new(RwLock::new(PoolSlots::default())),
        }
    }

    /// Create a provider from `PG_*` environment variables.
    pub fn from_env() -> DbResult<Self> {
        Ok(Self::new(DatabaseConfig::from_env()?))
    }

    /// Return the pool in effect, building the internal one on first use.
    ///
    /// An override pool always wins. Without one, a missing or invalid
    /// `PG_CONNECTION_STRING` fails with `DbError::Configuration` before any
    /// network activity.
    pub async fn get_pool(&self) -> DbResult<SharedPool> {
        // Fast path under the read lock
        {
            let slots = self.slots.read().await;
            if let Some(pool) = slots.current() {
                return Ok(pool);
            }
        }

        let mut slots = self.slots.write().await;
        // Re-check: another task may have built it while we waited for the lock
        if let Some(pool) = slots.current() {
            return Ok(pool);
        }

        let settings = self.config.connection_settings()?;
        let pool: SharedPool = Arc::new(PgConnectionPool::connect_lazy(&settings)?);

        info!(
            max_connections = settings.pool_options.max_connections_or_default(),
            acquire_timeout_secs = settings.pool_options.acquire_timeout().as_secs(),
            security = ?settings.security,
            "Created PostgreSQL pool"
        );

        slots.internal = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// Run `work` inside BEGIN/COMMIT on one connection.
    ///
    /// If `work` or COMMIT fails the transaction is rolled back and the original
    /// error is returned; a failing ROLLBACK is only logged. The connection is
    /// released exactly once on every path.
    ///
    /// ```ignore
    /// let rows = provider
    ///     .with_transaction(|conn| {
    ///         Box::pin(async move {
    ///             conn.execute("UPDATE drinks SET views = views + 1", &[]).await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut dyn PoolConnection) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<DbError> + Send,
    {
        let pool = self.get_pool().await?;
        let mut scope = TransactionScope::new(pool.acquire().await?);

        if let Err(e) = scope.begin().await {
            scope.release().await;
            return Err(e.into());
        }

        let outcome = match scope.connection() {
            Ok(conn) => work(conn).await,
            Err(e) => Err(e.into()),
        };

        let result = match outcome {
            Ok(value) => match scope.commit().await {
                Ok(()) => Ok(value),
                Err(e) => {
                    warn!(error = %e, "Commit failed, rolling back");
                    scope.rollback_quietly().await;
                    Err(e.into())
                }
            },
            Err(e) => {
                debug!("Transaction work failed, rolling back");
                scope.rollback_quietly().await;
                Err(e)
            }
        };

        scope.release().await;
        result
    }

    /// Replace the override pool; `None` clears it.
    ///
    /// Every later `get_pool` (and so every transaction) uses this pool instead
    /// of the internal one. Swapping it while requests are in flight can hand
    /// out connections from the wrong pool, so keep it to tests and admin tooling.
    pub async fn set_override_pool(&self, pool: Option<SharedPool>) {
        let mut slots = self.slots.write().await;
        info!(overridden = pool.is_some(), "Replacing override pool");
        slots.override_pool = pool;
    }

    /// Close the internal pool, if any, and clear both slots.
    ///
    /// Close errors are ignored. Safe to call repeatedly.
    pub async fn reset_pool(&self) {
        let internal = {
            let mut slots = self.slots.write().await;
            slots.override_pool = None;
            slots.internal.take()
        }; // Lock released here

        if let Some(pool) = internal {
            if let Err(e) = pool.close().await {
                debug!(error = %e, "Ignoring error while closing pool");
            }
            info!("Internal pool closed");
        }
    }

    pub async fn status(&self) -> PoolStatus {
        let slots = self.slots.read().await;
        PoolStatus {
            internal_created: slots.internal.is_some(),
            overridden: slots.override_pool.is_some(),
        }
    }
}
