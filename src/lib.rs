//! Bartender database layer.
//!
//! This library provides the PostgreSQL pool provider used by the bartender
//! backend (lazy singleton pool, override seam, scoped transactions), the
//! snapshot metadata service built on top of it, and the small HTTP API that
//! serves the latest snapshot to mobile clients.

pub mod config;
pub mod db;
pub mod error;
pub mod hash;
pub mod http;
pub mod snapshot;

pub use config::{Config, DatabaseConfig};
pub use db::{PoolProvider, SharedPool};
pub use error::{DbError, DbResult};
pub use snapshot::{SnapshotCounts, SnapshotMetadata};
