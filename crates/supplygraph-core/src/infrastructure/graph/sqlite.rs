//! SQLite implementation of the GraphStore
//!
//! Nodes keep their attributes as JSON; relationship payloads are flattened
//! into columns so time-windowed lookups stay on indexes.
//!
//! Every mutation is a single statement: the node upsert decides its outcome
//! in `ON CONFLICT ... RETURNING`, and relationship endpoints are checked by
//! the foreign keys of the insert itself. Writes through one store queue on
//! an async mutex; writers in other processes wait on the busy timeout.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::graph::{
    Direction, GraphStats, GraphStore, Neighbors, NewRelationship, Node, NodeAttributes, NodeKind,
    NodeRef, Relationship, RelationshipId, RelationshipKind, TransactionPayload, UpsertOutcome,
};
use crate::error::{Error, Result};

const RELATIONSHIP_COLUMNS: &str = "sequence, id, kind, source_kind, source_id, target_kind, \
     target_id, amount, date, quantity, product_id, recorded_at";

/// SQLite implementation of the graph store
///
/// Clones share the pool and the write queue.
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
    writes: Arc<Mutex<()>>,
}

impl SqliteGraphStore {
    /// Create a store over a migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            writes: Arc::new(Mutex::new(())),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Err(Error::Storage("graph store is closed".to_string()));
        }
        Ok(())
    }

    async fn node_exists(&self, node: &NodeRef) -> Result<bool> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM graph_nodes WHERE kind = ? AND id = ?")
                .bind(node.kind.as_str())
                .bind(&node.id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    /// Name the endpoint a rejected insert was missing
    async fn missing_endpoint(&self, relationship: &Relationship) -> Result<Error> {
        for endpoint in [&relationship.source, &relationship.target] {
            if !self.node_exists(endpoint).await? {
                return Ok(Error::NodeNotFound(endpoint.to_string()));
            }
        }
        Ok(Error::Storage(format!(
            "relationship {} references a missing node",
            relationship.id
        )))
    }
}

/// Fixed-width RFC 3339 so stored dates compare lexically
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stored_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("corrupt {} '{}': {}", column, value, e)))
}

fn encode_attributes(attributes: &NodeAttributes) -> Result<String> {
    serde_json::to_string(attributes)
        .map_err(|e| Error::Storage(format!("Failed to serialize attributes: {}", e)))
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    // ========== Node Operations ==========

    async fn upsert_node(
        &self,
        node: &NodeRef,
        attributes: &NodeAttributes,
    ) -> Result<UpsertOutcome> {
        self.ensure_open()?;
        let encoded = encode_attributes(attributes)?;
        let now = format_timestamp(&Utc::now());

        // No row back means the stored attributes already matched
        let _guard = self.writes.lock().await;
        let written: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO graph_nodes (kind, id, attributes, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(kind, id) DO UPDATE
                SET attributes = excluded.attributes, updated_at = excluded.updated_at
                WHERE graph_nodes.attributes <> excluded.attributes
            RETURNING created_at
            "#,
        )
        .bind(node.kind.as_str())
        .bind(&node.id)
        .bind(&encoded)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        let outcome = match written {
            None => UpsertOutcome::Unchanged,
            Some((created_at,)) if created_at == now => UpsertOutcome::Created,
            Some(_) => UpsertOutcome::Updated,
        };
        debug!(node = %node, outcome = ?outcome, "Node upserted");
        Ok(outcome)
    }

    async fn insert_node(&self, node: &NodeRef, attributes: &NodeAttributes) -> Result<()> {
        self.ensure_open()?;
        let encoded = encode_attributes(attributes)?;
        let now = format_timestamp(&Utc::now());

        let _guard = self.writes.lock().await;
        let result = sqlx::query(
            r#"
            INSERT INTO graph_nodes (kind, id, attributes, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(kind, id) DO NOTHING
            "#,
        )
        .bind(node.kind.as_str())
        .bind(&node.id)
        .bind(&encoded)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::DuplicateNode(node.to_string()));
        }
        debug!(node = %node, "Node inserted");
        Ok(())
    }

    async fn get_node(&self, node: &NodeRef) -> Result<Option<Node>> {
        self.ensure_open()?;
        let row: Option<NodeRow> = sqlx::query_as(
            "SELECT kind, id, attributes, created_at, updated_at FROM graph_nodes WHERE kind = ? AND id = ?",
        )
        .bind(node.kind.as_str())
        .bind(&node.id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_node()).transpose()
    }

    // ========== Relationship Operations ==========

    async fn append_relationship(
        &self,
        relationship: NewRelationship,
    ) -> Result<Arc<Relationship>> {
        self.ensure_open()?;
        let mut relationship = Relationship::from_new(relationship, 0);

        let guard = self.writes.lock().await;
        let inserted = sqlx::query(
            r#"
            INSERT INTO graph_relationships (
                id, kind, source_kind, source_id, target_kind, target_id,
                amount, date, quantity, product_id, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(relationship.id.to_string())
        .bind(relationship.kind.as_str())
        .bind(relationship.source.kind.as_str())
        .bind(&relationship.source.id)
        .bind(relationship.target.kind.as_str())
        .bind(&relationship.target.id)
        .bind(relationship.payload.amount)
        .bind(format_timestamp(&relationship.payload.date))
        .bind(i64::from(relationship.payload.quantity))
        .bind(&relationship.payload.product_id)
        .bind(format_timestamp(&relationship.recorded_at))
        .execute(&self.pool)
        .await;
        drop(guard);

        let result = match inserted {
            Ok(result) => result,
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                let err = self.missing_endpoint(&relationship).await?;
                warn!(relationship_id = %relationship.id, error = %err, "Append rejected");
                return Err(err);
            }
            Err(e) => return Err(e.into()),
        };

        relationship.sequence = result.last_insert_rowid() as u64;
        debug!(
            relationship_id = %relationship.id,
            sequence = relationship.sequence,
            "Relationship appended"
        );
        Ok(Arc::new(relationship))
    }

    async fn get_relationship(&self, id: &RelationshipId) -> Result<Option<Arc<Relationship>>> {
        self.ensure_open()?;
        let query = format!(
            "SELECT {} FROM graph_relationships WHERE id = ?",
            RELATIONSHIP_COLUMNS
        );
        let row: Option<RelationshipRow> = sqlx::query_as(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_relationship().map(Arc::new)).transpose()
    }

    async fn neighbors(
        &self,
        node: &NodeRef,
        kind: RelationshipKind,
        direction: Direction,
    ) -> Result<Neighbors> {
        self.ensure_open()?;
        let filter = match direction {
            Direction::Outgoing => "source_kind = ?1 AND source_id = ?2",
            Direction::Incoming => "target_kind = ?1 AND target_id = ?2",
            Direction::Both => {
                "((source_kind = ?1 AND source_id = ?2) OR (target_kind = ?1 AND target_id = ?2))"
            }
        };
        let query = format!(
            "SELECT {} FROM graph_relationships WHERE {} AND kind = ?3 ORDER BY sequence",
            RELATIONSHIP_COLUMNS, filter
        );

        let rows: Vec<RelationshipRow> = sqlx::query_as(&query)
            .bind(node.kind.as_str())
            .bind(&node.id)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;

        let relationships = rows
            .into_iter()
            .map(|r| r.into_relationship().map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Neighbors::new(relationships))
    }

    // ========== Lifecycle ==========

    async fn stats(&self) -> Result<GraphStats> {
        self.ensure_open()?;

        let nodes_by_kind: Vec<(String, i64)> =
            sqlx::query_as("SELECT kind, COUNT(*) FROM graph_nodes GROUP BY kind")
                .fetch_all(&self.pool)
                .await?;
        let relationships_by_kind: Vec<(String, i64)> =
            sqlx::query_as("SELECT kind, COUNT(*) FROM graph_relationships GROUP BY kind")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = GraphStats::default();
        for (kind, count) in nodes_by_kind {
            if let Some(kind) = NodeKind::parse(&kind) {
                stats.nodes_by_kind.insert(kind, count as u64);
                stats.total_nodes += count as u64;
            }
        }
        for (kind, count) in relationships_by_kind {
            if let Some(kind) = RelationshipKind::parse(&kind) {
                stats.relationships_by_kind.insert(kind, count as u64);
                stats.total_relationships += count as u64;
            }
        }
        Ok(stats)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        debug!("SQLite graph store closed");
        Ok(())
    }
}

// ========== Row Types ==========

#[derive(Debug, FromRow)]
struct NodeRow {
    kind: String,
    id: String,
    attributes: String,
    created_at: String,
    updated_at: String,
}

impl NodeRow {
    fn into_node(self) -> Result<Node> {
        let kind = NodeKind::parse(&self.kind)
            .ok_or_else(|| Error::Storage(format!("Invalid node kind: {}", self.kind)))?;
        let attributes: NodeAttributes = serde_json::from_str(&self.attributes).map_err(|e| {
            Error::Storage(format!("corrupt attributes for {}:{}: {}", kind, self.id, e))
        })?;

        Ok(Node {
            node_ref: NodeRef::new(kind, self.id),
            attributes,
            created_at: parse_stored_timestamp("created_at", &self.created_at)?,
            updated_at: parse_stored_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct RelationshipRow {
    sequence: i64,
    id: String,
    kind: String,
    source_kind: String,
    source_id: String,
    target_kind: String,
    target_id: String,
    amount: f64,
    date: String,
    quantity: i64,
    product_id: Option<String>,
    recorded_at: String,
}

impl RelationshipRow {
    fn into_relationship(self) -> Result<Relationship> {
        let kind = RelationshipKind::parse(&self.kind)
            .ok_or_else(|| Error::Storage(format!("Invalid relationship kind: {}", self.kind)))?;
        let endpoint = |kind: &str, id: String| -> Result<NodeRef> {
            NodeKind::parse(kind)
                .map(|kind| NodeRef::new(kind, id))
                .ok_or_else(|| Error::Storage(format!("Invalid node kind: {}", kind)))
        };
        let quantity = u32::try_from(self.quantity)
            .map_err(|_| Error::Storage(format!("Invalid quantity: {}", self.quantity)))?;

        Ok(Relationship {
            id: RelationshipId::parse(&self.id)?,
            sequence: self.sequence as u64,
            kind,
            source: endpoint(&self.source_kind, self.source_id)?,
            target: endpoint(&self.target_kind, self.target_id)?,
            payload: TransactionPayload {
                amount: self.amount,
                date: parse_stored_timestamp("date", &self.date)?,
                quantity,
                product_id: self.product_id,
            },
            recorded_at: parse_stored_timestamp("recorded_at", &self.recorded_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{CitizenAttributes, OrganisationAttributes, ProductAttributes};
    use crate::storage::{Database, DatabaseConfig};
    use chrono::TimeZone;

    async fn setup_test_store() -> SqliteGraphStore {
        let db = Database::in_memory().await.expect("Failed to create database");
        SqliteGraphStore::new(db.pool().clone())
    }

    async fn seed(store: &SqliteGraphStore) {
        store
            .upsert_node(
                &NodeRef::citizen("C1"),
                &NodeAttributes::Citizen(CitizenAttributes::new().with_account_id(7)),
            )
            .await
            .unwrap();
        store
            .upsert_node(
                &NodeRef::business("B1"),
                &NodeAttributes::Business(
                    OrganisationAttributes::new("Spaza").with_location(-26.2, 28.0),
                ),
            )
            .await
            .unwrap();
        store
            .upsert_node(
                &NodeRef::product("P1"),
                &NodeAttributes::Product(ProductAttributes::new("Bread")),
            )
            .await
            .unwrap();
    }

    fn purchase(amount: f64) -> NewRelationship {
        NewRelationship::new(
            RelationshipKind::PurchasedFrom,
            NodeRef::citizen("C1"),
            NodeRef::business("B1"),
            TransactionPayload::new(amount, Utc.with_ymd_and_hms(2025, 2, 1, 9, 30, 0).unwrap())
                .with_product("P1")
                .with_quantity(2),
        )
    }

    #[tokio::test]
    async fn test_node_round_trip() {
        let store = setup_test_store().await;
        seed(&store).await;

        let node = store.get_node(&NodeRef::business("B1")).await.unwrap().unwrap();
        assert_eq!(node.kind(), NodeKind::Business);
        assert_eq!(node.attributes.display_name(), Some("Spaza"));
        assert!(store.get_node(&NodeRef::business("B2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_outcomes() {
        let store = setup_test_store().await;
        let node = NodeRef::product("P9");
        let bread = NodeAttributes::Product(ProductAttributes::new("Bread"));
        let milk = NodeAttributes::Product(ProductAttributes::new("Milk"));

        assert_eq!(store.upsert_node(&node, &bread).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(store.upsert_node(&node, &bread).await.unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(store.upsert_node(&node, &milk).await.unwrap(), UpsertOutcome::Updated);

        let err = store.insert_node(&node, &milk).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateNode(_)));
    }

    #[tokio::test]
    async fn test_relationship_round_trip() {
        let store = setup_test_store().await;
        seed(&store).await;

        let rel = store.append_relationship(purchase(42.5)).await.unwrap();
        let fetched = store.get_relationship(&rel.id).await.unwrap().unwrap();

        assert_eq!(fetched.id, rel.id);
        assert_eq!(fetched.sequence, rel.sequence);
        assert_eq!(fetched.payload, rel.payload);
        assert_eq!(fetched.source, NodeRef::citizen("C1"));
        assert_eq!(fetched.target, NodeRef::business("B1"));
    }

    #[tokio::test]
    async fn test_neighbors_in_insertion_order() {
        let store = setup_test_store().await;
        seed(&store).await;

        let first = store.append_relationship(purchase(1.0)).await.unwrap();
        let second = store.append_relationship(purchase(2.0)).await.unwrap();
        assert!(second.sequence > first.sequence);

        let out = store
            .neighbors(
                &NodeRef::citizen("C1"),
                RelationshipKind::PurchasedFrom,
                Direction::Outgoing,
            )
            .await
            .unwrap();
        let ids: Vec<_> = out.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);

        let inc = store
            .neighbors(&NodeRef::business("B1"), RelationshipKind::PurchasedFrom, Direction::Both)
            .await
            .unwrap();
        assert_eq!(inc.len(), 2);

        let none = store
            .neighbors(&NodeRef::business("B1"), RelationshipKind::Sells, Direction::Both)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_append_with_missing_endpoint() {
        let store = setup_test_store().await;
        seed(&store).await;

        let err = store
            .append_relationship(NewRelationship::new(
                RelationshipKind::Sells,
                NodeRef::business("B404"),
                NodeRef::product("P1"),
                TransactionPayload::new(1.0, Utc::now()),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeNotFound(ref node) if node == "business:B404"));
        assert_eq!(store.stats().await.unwrap().total_relationships, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = setup_test_store().await;
        seed(&store).await;
        store.append_relationship(purchase(3.0)).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.total_relationships, 1);
        assert_eq!(stats.nodes_by_kind.get(&NodeKind::Citizen), Some(&1));
        assert_eq!(
            stats.relationships_by_kind.get(&RelationshipKind::PurchasedFrom),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");

        {
            let db = Database::new(DatabaseConfig::with_path(&path))
                .await
                .unwrap();
            let store = SqliteGraphStore::new(db.pool().clone());
            seed(&store).await;
            store.append_relationship(purchase(9.0)).await.unwrap();
            store.close().await.unwrap();
        }

        let db = Database::new(DatabaseConfig::with_path(&path))
            .await
            .unwrap();
        let store = SqliteGraphStore::new(db.pool().clone());
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.total_relationships, 1);
    }

    #[tokio::test]
    async fn test_append_with_missing_target() {
        let store = setup_test_store().await;
        seed(&store).await;

        let err = store
            .append_relationship(NewRelationship::new(
                RelationshipKind::PurchasedProduct,
                NodeRef::citizen("C1"),
                NodeRef::product("P404"),
                TransactionPayload::new(1.0, Utc::now()),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeNotFound(ref node) if node == "product:P404"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let db = Database::new(DatabaseConfig::with_path(&path)).await.unwrap();
        let store = SqliteGraphStore::new(db.pool().clone());
        seed(&store).await;

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert_node(
                        &NodeRef::citizen(format!("X{}", i % 4)),
                        &NodeAttributes::Citizen(CitizenAttributes::new()),
                    )
                    .await
                    .unwrap();
                store.append_relationship(purchase(i as f64)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_relationships, 32);
        assert_eq!(stats.nodes_by_kind.get(&NodeKind::Citizen), Some(&5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_separate_handles_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let first = Database::new(DatabaseConfig::with_path(&path))
            .await
            .unwrap();
        let second = Database::new(DatabaseConfig::with_path(&path))
            .await
            .unwrap();
        let stores = [
            SqliteGraphStore::new(first.pool().clone()),
            SqliteGraphStore::new(second.pool().clone()),
        ];
        seed(&stores[0]).await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = stores[i % 2].clone();
            handles.push(tokio::spawn(async move {
                store.append_relationship(purchase(i as f64)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(stores[1].stats().await.unwrap().total_relationships, 16);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = setup_test_store().await;
        store.close().await.unwrap();

        let err = store.stats().await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }
}
