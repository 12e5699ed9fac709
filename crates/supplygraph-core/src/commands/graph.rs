//! Provenance graph facade
//!
//! `ProvenanceGraph` is the handle interfaces hold: it wires one store to
//! the schema registry, the transaction writer, the traversal engine and the
//! provenance queries, and publishes a `GraphEvent` for every write.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::Config;
use crate::domain::graph::{
    DEFAULT_MAX_HOPS, Direction, GraphEvent, GraphStats, GraphStore, Neighbors, Node,
    NodeAttributes, NodeRef, PathStream, Relationship, RelationshipId, RelationshipKind,
    SchemaRegistry, TransactionPayload, TransactionRequest, TransactionWriter, TraversalEngine,
    TraversalPath, TraversalQuery, UpsertOutcome,
};
use crate::domain::provenance::{DemandRow, OriginRow, ProvenanceQueryService, ProvenanceRow};
use crate::error::{Error, Result};
use crate::infrastructure::graph::{InMemoryGraphStore, SqliteGraphStore};
use crate::storage::{Database, DatabaseConfig};

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared handle to a provenance graph
pub struct ProvenanceGraph {
    store: Arc<dyn GraphStore>,
    registry: Arc<SchemaRegistry>,
    writer: TransactionWriter<dyn GraphStore>,
    engine: TraversalEngine<dyn GraphStore>,
    queries: ProvenanceQueryService<dyn GraphStore>,
    events: broadcast::Sender<GraphEvent>,
    database: Option<Database>,
    default_max_hops: u32,
}

impl ProvenanceGraph {
    /// Wire a graph over an existing store
    pub fn new(store: Arc<dyn GraphStore>, registry: SchemaRegistry) -> Self {
        let registry = Arc::new(registry);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let writer = TransactionWriter::new(Arc::clone(&store), Arc::clone(&registry))
            .with_events(events.clone());
        let engine = TraversalEngine::new(Arc::clone(&store));
        let queries = ProvenanceQueryService::new(Arc::clone(&store), engine.clone());

        Self {
            store,
            registry,
            writer,
            engine,
            queries,
            events,
            database: None,
            default_max_hops: DEFAULT_MAX_HOPS,
        }
    }

    /// An in-memory graph with the standard registry
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryGraphStore::new()), SchemaRegistry::standard())
    }

    /// Open the graph described by the configuration
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let registry = config.schema_registry()?;

        let graph = match config.store.backend.as_str() {
            "memory" => Self::new(Arc::new(InMemoryGraphStore::new()), registry),
            _ => {
                let path = config.database_path()?;
                let database = Database::new(DatabaseConfig::from_store(&config.store, &path))
                    .await
                    .with_context(|| {
                        format!("Failed to open graph database: {}", path.display())
                    })?;

                let store = Arc::new(SqliteGraphStore::new(database.pool().clone()));
                let mut graph = Self::new(store, registry);
                graph.database = Some(database);
                graph
            }
        };

        info!(
            backend = %config.store.backend,
            max_hops_limit = config.traversal.max_hops_limit,
            "Provenance graph opened"
        );
        Ok(graph
            .with_max_hops_limit(config.traversal.max_hops_limit)
            .with_default_max_hops(config.traversal.default_max_hops))
    }

    /// Change the hard limit on traversal `max_hops`
    pub fn with_max_hops_limit(mut self, limit: u32) -> Self {
        self.engine = TraversalEngine::new(Arc::clone(&self.store)).with_max_hops_limit(limit);
        self.queries = ProvenanceQueryService::new(Arc::clone(&self.store), self.engine.clone());
        self
    }

    /// Change the `max_hops` given to queries built with [`Self::query`]
    pub fn with_default_max_hops(mut self, max_hops: u32) -> Self {
        self.default_max_hops = max_hops;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Backing database, for the sqlite backend
    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    pub fn max_hops_limit(&self) -> u32 {
        self.engine.max_hops_limit()
    }

    // ========== Writes ==========

    /// Create or update a node; identical input is a no-op
    pub async fn register_node(
        &self,
        node: NodeRef,
        attributes: NodeAttributes,
    ) -> Result<UpsertOutcome> {
        require_id(&node)?;
        self.registry.validate_node(node.kind, &attributes)?;
        let outcome = self.store.upsert_node(&node, &attributes).await?;

        debug!(node = %node, outcome = ?outcome, "Node registered");
        let _ = self.events.send(GraphEvent::node_registered(node, outcome));
        Ok(outcome)
    }

    /// Create a node, failing with `DuplicateNode` if it exists
    pub async fn register_node_strict(
        &self,
        node: NodeRef,
        attributes: NodeAttributes,
    ) -> Result<()> {
        require_id(&node)?;
        self.registry.validate_node(node.kind, &attributes)?;
        self.store.insert_node(&node, &attributes).await?;

        let _ = self
            .events
            .send(GraphEvent::node_registered(node, UpsertOutcome::Created));
        Ok(())
    }

    /// Record one transaction between two registered nodes
    pub async fn record_transaction(
        &self,
        kind: RelationshipKind,
        source: NodeRef,
        target: NodeRef,
        payload: TransactionPayload,
    ) -> Result<RelationshipId> {
        let relationship = self
            .writer
            .record(TransactionRequest::new(kind, source, target, payload))
            .await?;
        Ok(relationship.id)
    }

    /// Record a transaction by bare ids; endpoint kinds come from the registry
    pub async fn record_transaction_by_id(
        &self,
        kind: RelationshipKind,
        source_id: &str,
        target_id: &str,
        payload: TransactionPayload,
    ) -> Result<RelationshipId> {
        let request =
            TransactionRequest::from_ids(&self.registry, kind, source_id, target_id, payload)?;
        let relationship = self.writer.record(request).await?;
        Ok(relationship.id)
    }

    /// Record a prepared request, returning the stored instance
    pub async fn record(&self, request: TransactionRequest) -> Result<Arc<Relationship>> {
        self.writer.record(request).await
    }

    // ========== Reads ==========

    pub async fn get_node(&self, node: &NodeRef) -> Result<Node> {
        self.store
            .get_node(node)
            .await?
            .ok_or_else(|| Error::NodeNotFound(node.to_string()))
    }

    pub async fn get_relationship(&self, id: &RelationshipId) -> Result<Arc<Relationship>> {
        self.store
            .get_relationship(id)
            .await?
            .ok_or_else(|| Error::RelationshipNotFound(id.to_string()))
    }

    /// Adjacency snapshot of a registered node
    pub async fn neighbors(
        &self,
        node: &NodeRef,
        kind: RelationshipKind,
        direction: Direction,
    ) -> Result<Neighbors> {
        if self.store.get_node(node).await?.is_none() {
            return Err(Error::NodeNotFound(node.to_string()));
        }
        self.store.neighbors(node, kind, direction).await
    }

    /// Start a query from `seed` bounded by the default `max_hops`
    pub fn query(&self, seed: NodeRef) -> TraversalQuery {
        TraversalQuery::from_node(seed, self.default_max_hops)
    }

    pub fn traverse(&self, query: TraversalQuery) -> Result<PathStream> {
        self.engine.traverse(query)
    }

    pub async fn collect_paths(&self, query: TraversalQuery) -> Result<Vec<TraversalPath>> {
        self.engine.collect(query).await
    }

    pub async fn trace_product_provenance(
        &self,
        product_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProvenanceRow>> {
        self.queries.trace_product_provenance(product_id, since).await
    }

    pub async fn trace_product_demand(
        &self,
        product_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DemandRow>> {
        self.queries.trace_product_demand(product_id, since).await
    }

    pub async fn trace_purchase_origin(
        &self,
        citizen_id: &str,
        product_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<OriginRow>> {
        self.queries
            .trace_purchase_origin(citizen_id, product_id, since)
            .await
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        self.store.stats().await
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    /// Release the store; later calls fail with `Storage`
    pub async fn close(&self) -> Result<()> {
        self.store.close().await?;
        if let Some(database) = &self.database {
            database.close().await;
        }
        info!("Provenance graph closed");
        Ok(())
    }
}

fn require_id(node: &NodeRef) -> Result<()> {
    if node.id.trim().is_empty() {
        return Err(Error::InvalidInput(format!(
            "{} id must not be blank",
            node.kind.as_str()
        )));
    }
    Ok(())
}

impl Default for ProvenanceGraph {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for ProvenanceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvenanceGraph")
            .field("max_hops_limit", &self.engine.max_hops_limit())
            .field("persistent", &self.database.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{
        CitizenAttributes, OrganisationAttributes, ProductAttributes, TraversalStep,
    };
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    async fn seeded() -> ProvenanceGraph {
        let graph = ProvenanceGraph::in_memory();
        graph
            .register_node(
                NodeRef::manufacturer("M1"),
                NodeAttributes::Manufacturer(OrganisationAttributes::new("Acme Mills")),
            )
            .await
            .unwrap();
        graph
            .register_node(
                NodeRef::business("B1"),
                NodeAttributes::Business(OrganisationAttributes::new("Corner Spaza")),
            )
            .await
            .unwrap();
        graph
            .register_node(
                NodeRef::product("P1"),
                NodeAttributes::Product(ProductAttributes::new("Maize Meal")),
            )
            .await
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_register_node_validates_kind() {
        let graph = ProvenanceGraph::in_memory();

        let err = graph
            .register_node(
                NodeRef::business("B1"),
                NodeAttributes::Product(ProductAttributes::new("Bread")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
        assert_eq!(graph.stats().await.unwrap().total_nodes, 0);
    }

    #[tokio::test]
    async fn test_register_rejects_blank_id() {
        let graph = ProvenanceGraph::in_memory();

        for id in ["", "   "] {
            let err = graph
                .register_node(
                    NodeRef::citizen(id),
                    NodeAttributes::Citizen(CitizenAttributes::new()),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{:?}", id);

            let err = graph
                .register_node_strict(
                    NodeRef::citizen(id),
                    NodeAttributes::Citizen(CitizenAttributes::new()),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{:?}", id);
        }
        assert_eq!(graph.stats().await.unwrap().total_nodes, 0);
    }

    #[tokio::test]
    async fn test_register_node_is_idempotent() {
        let graph = seeded().await;

        let outcome = graph
            .register_node(
                NodeRef::business("B1"),
                NodeAttributes::Business(OrganisationAttributes::new("Corner Spaza")),
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(graph.stats().await.unwrap().total_nodes, 3);

        let err = graph
            .register_node_strict(
                NodeRef::business("B1"),
                NodeAttributes::Business(OrganisationAttributes::new("Corner Spaza")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateNode(_)));
    }

    #[tokio::test]
    async fn test_record_and_trace() {
        let graph = seeded().await;

        graph
            .record_transaction_by_id(
                RelationshipKind::SuppliesTo,
                "M1",
                "B1",
                TransactionPayload::new(100.0, date(2025, 2, 1)),
            )
            .await
            .unwrap();
        graph
            .record_transaction_by_id(
                RelationshipKind::ProducedBy,
                "P1",
                "M1",
                TransactionPayload::link(date(2025, 1, 1)),
            )
            .await
            .unwrap();
        graph
            .record_transaction_by_id(
                RelationshipKind::Sells,
                "B1",
                "P1",
                TransactionPayload::new(20.0, date(2025, 2, 5)),
            )
            .await
            .unwrap();

        let rows = graph
            .trace_product_provenance("P1", date(2025, 1, 1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].manufacturer_id, "M1");
        assert_eq!(rows[0].business_id, "B1");
        assert_eq!(rows[0].amount, 100.0);
        assert_eq!(rows[0].quantity, 1);
        assert_eq!(rows[0].date, date(2025, 2, 1));
    }

    #[tokio::test]
    async fn test_get_relationship_and_neighbors() {
        let graph = seeded().await;
        let id = graph
            .record_transaction(
                RelationshipKind::Sells,
                NodeRef::business("B1"),
                NodeRef::product("P1"),
                TransactionPayload::new(20.0, date(2025, 2, 5)),
            )
            .await
            .unwrap();

        let relationship = graph.get_relationship(&id).await.unwrap();
        assert_eq!(relationship.kind, RelationshipKind::Sells);

        let missing = graph.get_relationship(&RelationshipId::new()).await.unwrap_err();
        assert!(matches!(missing, Error::RelationshipNotFound(_)));

        let neighbors = graph
            .neighbors(&NodeRef::product("P1"), RelationshipKind::Sells, Direction::Incoming)
            .await
            .unwrap();
        assert_eq!(neighbors.len(), 1);

        let err = graph
            .neighbors(&NodeRef::product("P404"), RelationshipKind::Sells, Direction::Incoming)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_subscribe_receives_writes() {
        let graph = ProvenanceGraph::in_memory();
        let mut events = graph.subscribe();

        graph
            .register_node(
                NodeRef::citizen("C1"),
                NodeAttributes::Citizen(CitizenAttributes::new()),
            )
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type_name(), "node_registered");
    }

    #[tokio::test]
    async fn test_max_hops_limit_is_enforced() {
        let graph = seeded().await.with_max_hops_limit(2);
        assert_eq!(graph.max_hops_limit(), 2);

        let query = TraversalQuery::from_node(NodeRef::product("P1"), 3)
            .step(TraversalStep::outgoing(RelationshipKind::ProducedBy));
        let err = graph.collect_paths(query).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_open_memory_backend() {
        let mut config = Config::default();
        config.set("store.backend", "memory").unwrap();
        config.set("traversal.max_hops_limit", "8").unwrap();

        config.set("traversal.default_max_hops", "3").unwrap();

        let graph = ProvenanceGraph::open(&config).await.unwrap();
        assert!(graph.database().is_none());
        assert_eq!(graph.max_hops_limit(), 8);
        assert_eq!(graph.query(NodeRef::product("P1")).max_hops, 3);
    }

    #[tokio::test]
    async fn test_open_sqlite_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config
            .set("store.path", &dir.path().join("graph.db").display().to_string())
            .unwrap();

        let graph = ProvenanceGraph::open(&config).await.unwrap();
        graph
            .register_node(
                NodeRef::product("P1"),
                NodeAttributes::Product(ProductAttributes::new("Maize Meal")),
            )
            .await
            .unwrap();
        assert!(graph.database().is_some());
        assert_eq!(graph.stats().await.unwrap().total_nodes, 1);
        graph.close().await.unwrap();
    }
}
