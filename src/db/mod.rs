//! Database access layer.
//!
//! This module provides:
//! - The `ConnectionPool` / `PoolConnection` seams and their sqlx implementation
//! - `PoolProvider`, which owns the lazily created pool and the override seam
//! - Scoped transactions with guaranteed release
//! - Query parameters and row decoding

pub mod params;
pub mod pool;
pub mod provider;
pub mod transaction;
pub mod types;

pub use params::QueryParam;
pub use pool::{ConnectionPool, PgConnectionPool, PgPoolConnection, PoolConnection, SharedPool};
pub use provider::{PoolProvider, PoolStatus};
pub use transaction::TransactionScope;
pub use types::{JsonRow, RowToJson};
