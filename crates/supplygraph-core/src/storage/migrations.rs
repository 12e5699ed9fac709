//! Database migrations
//!
//! This module manages SQLite schema migrations for the provenance graph.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Nodes and relationship instances
const MIGRATION_V1: &str = r#"
    -- Identity index: one row per (kind, id)
    CREATE TABLE IF NOT EXISTS graph_nodes (
        kind TEXT NOT NULL CHECK (kind IN ('citizen', 'business', 'manufacturer', 'product')),
        id TEXT NOT NULL,
        attributes TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (kind, id)
    );

    -- Relationship instances; sequence doubles as insertion order
    CREATE TABLE IF NOT EXISTS graph_relationships (
        sequence INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        source_kind TEXT NOT NULL,
        source_id TEXT NOT NULL,
        target_kind TEXT NOT NULL,
        target_id TEXT NOT NULL,
        amount REAL NOT NULL DEFAULT 0.0 CHECK (amount >= 0.0),
        date TEXT NOT NULL,
        quantity INTEGER NOT NULL DEFAULT 1 CHECK (quantity >= 1),
        product_id TEXT,
        recorded_at TEXT NOT NULL,
        FOREIGN KEY (source_kind, source_id) REFERENCES graph_nodes(kind, id),
        FOREIGN KEY (target_kind, target_id) REFERENCES graph_nodes(kind, id)
    );

    -- Adjacency indexes, one per direction
    CREATE INDEX IF NOT EXISTS idx_graph_relationships_source
        ON graph_relationships(source_kind, source_id, kind, sequence);
    CREATE INDEX IF NOT EXISTS idx_graph_relationships_target
        ON graph_relationships(target_kind, target_id, kind, sequence);
"#;

/// Migration 2: Lookup support for product-scoped and time-windowed queries
const MIGRATION_V2: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_graph_relationships_product
        ON graph_relationships(product_id) WHERE product_id IS NOT NULL;
    CREATE INDEX IF NOT EXISTS idx_graph_relationships_kind_date
        ON graph_relationships(kind, date);
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Graph nodes and relationships");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Product and date indexes");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}
