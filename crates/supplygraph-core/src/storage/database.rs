//! Graph database bootstrap
//!
//! Opens the SQLite file behind `SqliteGraphStore`. Every pooled connection
//! gets the WAL journal, foreign keys and a busy timeout, so writers from
//! other handles or processes queue on the file lock instead of failing.
//! The schema is migrated before the pool is handed out.

use crate::config::StoreConfig;
use crate::storage::migrations;
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default maximum connections in the pool
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default wait on a locked database file, in milliseconds
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const MEMORY_PATH: &str = ":memory:";

/// Connection settings for the graph database
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }

    /// A private in-memory database
    ///
    /// Each SQLite in-memory connection is its own database, so the pool is
    /// pinned to one connection that is never recycled.
    pub fn in_memory() -> Self {
        Self {
            max_connections: 1,
            ..Self::with_path(MEMORY_PATH)
        }
    }

    /// Pool settings from the `[store]` config section
    pub fn from_store(store: &StoreConfig, path: impl Into<PathBuf>) -> Self {
        Self::with_path(path)
            .max_connections(store.max_connections)
            .busy_timeout(Duration::from_millis(store.busy_timeout_ms))
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_PATH
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };

        // Per-connection settings, so they go on the options rather than a
        // one-off PRAGMA
        Ok(options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout))
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        let options = SqlitePoolOptions::new().max_connections(self.max_connections);
        if self.is_in_memory() {
            options.idle_timeout(None).max_lifetime(None)
        } else {
            options
        }
    }
}

/// Migrated connection pool for the graph store
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    /// Open (creating if needed) and migrate the database
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if !config.is_in_memory() {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory: {}", parent.display())
                    })?;
                }
            }
        }

        let pool = config
            .pool_options()
            .connect_with(config.connect_options()?)
            .await
            .with_context(|| format!("Failed to connect to database: {}", config.path.display()))?;

        migrations::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self {
            pool,
            path: config.path,
        })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migration_status(&self) -> Result<migrations::MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to check migration status")
    }

    /// Journal mode the connections run with (`wal` for files)
    pub async fn journal_mode(&self) -> Result<String> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read journal mode")?;
        Ok(mode.to_lowercase())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::in_memory().await.unwrap();

        db.health_check().await.unwrap();
        let status = db.migration_status().await.unwrap();
        assert!(!status.needs_migration);
        assert_eq!(db.path(), Path::new(":memory:"));
    }

    #[test]
    fn test_config_from_store_section() {
        let store = StoreConfig {
            max_connections: 9,
            busy_timeout_ms: 250,
            ..StoreConfig::default()
        };

        let config = DatabaseConfig::from_store(&store, "/tmp/graph.db");
        assert_eq!(config.path, PathBuf::from("/tmp/graph.db"));
        assert_eq!(config.max_connections, 9);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert!(!config.is_in_memory());
        assert!(DatabaseConfig::in_memory().is_in_memory());
    }

    #[tokio::test]
    async fn test_file_database_connection_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");
        let config = DatabaseConfig::with_path(&path).busy_timeout(Duration::from_millis(1_500));

        let db = Database::new(config).await.unwrap();
        assert!(path.exists());
        assert_eq!(db.journal_mode().await.unwrap(), "wal");

        let (foreign_keys,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let (busy_timeout,): (i64,) = sqlx::query_as("PRAGMA busy_timeout")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);
        assert_eq!(busy_timeout, 1_500);
        db.close().await;
    }

    #[tokio::test]
    async fn test_reopen_keeps_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");

        Database::new(DatabaseConfig::with_path(&path))
            .await
            .unwrap()
            .close()
            .await;
        let db = Database::new(DatabaseConfig::with_path(&path)).await.unwrap();

        let status = db.migration_status().await.unwrap();
        assert_eq!(status.current_version, migrations::CURRENT_VERSION);
    }
}
