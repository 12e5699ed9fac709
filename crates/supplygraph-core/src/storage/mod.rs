//! Storage layer - SQLite
//!
//! Provides database management and migrations for the persistent graph store.
//!
//! # Architecture
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning and automatic migration
//!
//! # Usage
//!
//! ```ignore
//! use supplygraph_core::storage::Database;
//!
//! let db = Database::in_memory().await?;
//! let store = SqliteGraphStore::new(db.pool().clone());
//! ```

pub mod database;
pub mod migrations;

pub use database::{
    DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS, Database, DatabaseConfig,
};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
