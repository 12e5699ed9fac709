//! In-memory implementation of the GraphStore
//!
//! All state sits behind one `RwLock`: mutations take the write guard, so a
//! relationship is linked to both endpoints before any reader can look.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::graph::{
    Direction, GraphStats, GraphStore, Neighbors, NewRelationship, Node, NodeAttributes, NodeRef,
    Relationship, RelationshipId, RelationshipKind, UpsertOutcome,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AdjacencyKey {
    node: NodeRef,
    kind: RelationshipKind,
    /// Only `Outgoing` or `Incoming`; `Both` is resolved at read time
    direction: Direction,
}

impl AdjacencyKey {
    fn new(node: &NodeRef, kind: RelationshipKind, direction: Direction) -> Self {
        Self {
            node: node.clone(),
            kind,
            direction,
        }
    }
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<NodeRef, Node>,
    relationships: HashMap<RelationshipId, Arc<Relationship>>,
    adjacency: HashMap<AdjacencyKey, Vec<Arc<Relationship>>>,
    next_sequence: u64,
    closed: bool,
}

impl GraphState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Storage("graph store is closed".to_string()));
        }
        Ok(())
    }

    fn adjacency(
        &self,
        node: &NodeRef,
        kind: RelationshipKind,
        direction: Direction,
    ) -> Vec<Arc<Relationship>> {
        self.adjacency
            .get(&AdjacencyKey::new(node, kind, direction))
            .cloned()
            .unwrap_or_default()
    }

    /// Reserve every allocation an append needs so the mutation that follows
    /// cannot fail halfway
    fn reserve_append(&mut self, out_key: &AdjacencyKey, in_key: &AdjacencyKey) -> Result<()> {
        let exhausted = |what: &str| Error::Storage(format!("{} capacity exhausted", what));

        self.relationships
            .try_reserve(1)
            .map_err(|_| exhausted("relationship index"))?;
        self.adjacency
            .try_reserve(2)
            .map_err(|_| exhausted("adjacency index"))?;
        for key in [out_key, in_key] {
            if let Some(list) = self.adjacency.get_mut(key) {
                list.try_reserve(1)
                    .map_err(|_| exhausted("adjacency list"))?;
            }
        }
        Ok(())
    }
}

/// In-memory graph store
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    // ========== Node Operations ==========

    async fn upsert_node(
        &self,
        node: &NodeRef,
        attributes: &NodeAttributes,
    ) -> Result<UpsertOutcome> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        let outcome = match state.nodes.get_mut(node) {
            Some(existing) if &existing.attributes == attributes => UpsertOutcome::Unchanged,
            Some(existing) => {
                existing.attributes = attributes.clone();
                existing.updated_at = Utc::now();
                UpsertOutcome::Updated
            }
            None => {
                state
                    .nodes
                    .insert(node.clone(), Node::new(node.clone(), attributes.clone()));
                UpsertOutcome::Created
            }
        };

        debug!(node = %node, outcome = ?outcome, "Node upserted");
        Ok(outcome)
    }

    async fn insert_node(&self, node: &NodeRef, attributes: &NodeAttributes) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        if state.nodes.contains_key(node) {
            return Err(Error::DuplicateNode(node.to_string()));
        }
        state
            .nodes
            .insert(node.clone(), Node::new(node.clone(), attributes.clone()));

        debug!(node = %node, "Node inserted");
        Ok(())
    }

    async fn get_node(&self, node: &NodeRef) -> Result<Option<Node>> {
        let state = self.state.read().await;
        state.ensure_open()?;
        Ok(state.nodes.get(node).cloned())
    }

    // ========== Relationship Operations ==========

    async fn append_relationship(
        &self,
        relationship: NewRelationship,
    ) -> Result<Arc<Relationship>> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        for endpoint in [&relationship.source, &relationship.target] {
            if !state.nodes.contains_key(endpoint) {
                return Err(Error::NodeNotFound(endpoint.to_string()));
            }
        }

        let out_key =
            AdjacencyKey::new(&relationship.source, relationship.kind, Direction::Outgoing);
        let in_key =
            AdjacencyKey::new(&relationship.target, relationship.kind, Direction::Incoming);
        state.reserve_append(&out_key, &in_key)?;

        let sequence = state.next_sequence;
        let relationship = Arc::new(Relationship::from_new(relationship, sequence));

        state.next_sequence += 1;
        state
            .relationships
            .insert(relationship.id, Arc::clone(&relationship));
        state
            .adjacency
            .entry(out_key)
            .or_default()
            .push(Arc::clone(&relationship));
        state
            .adjacency
            .entry(in_key)
            .or_default()
            .push(Arc::clone(&relationship));

        debug!(
            relationship_id = %relationship.id,
            sequence = sequence,
            "Relationship appended"
        );
        Ok(relationship)
    }

    async fn get_relationship(&self, id: &RelationshipId) -> Result<Option<Arc<Relationship>>> {
        let state = self.state.read().await;
        state.ensure_open()?;
        Ok(state.relationships.get(id).cloned())
    }

    async fn neighbors(
        &self,
        node: &NodeRef,
        kind: RelationshipKind,
        direction: Direction,
    ) -> Result<Neighbors> {
        let state = self.state.read().await;
        state.ensure_open()?;

        let neighbors = match direction {
            Direction::Outgoing | Direction::Incoming => {
                Neighbors::new(state.adjacency(node, kind, direction))
            }
            Direction::Both => Neighbors::merge(
                state.adjacency(node, kind, Direction::Outgoing),
                state.adjacency(node, kind, Direction::Incoming),
            ),
        };
        Ok(neighbors)
    }

    // ========== Lifecycle ==========

    async fn stats(&self) -> Result<GraphStats> {
        let state = self.state.read().await;
        state.ensure_open()?;

        let mut stats = GraphStats {
            total_nodes: state.nodes.len() as u64,
            total_relationships: state.relationships.len() as u64,
            ..Default::default()
        };
        for node in state.nodes.keys() {
            *stats.nodes_by_kind.entry(node.kind).or_insert(0) += 1;
        }
        for relationship in state.relationships.values() {
            *stats
                .relationships_by_kind
                .entry(relationship.kind)
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.closed = true;
        debug!("In-memory graph store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{OrganisationAttributes, ProductAttributes, TransactionPayload};

    fn business(name: &str) -> NodeAttributes {
        NodeAttributes::Business(OrganisationAttributes::new(name))
    }

    fn product(name: &str) -> NodeAttributes {
        NodeAttributes::Product(ProductAttributes::new(name))
    }

    async fn store_with_sale() -> (InMemoryGraphStore, Arc<Relationship>) {
        let store = InMemoryGraphStore::new();
        store
            .upsert_node(&NodeRef::business("B1"), &business("Spaza"))
            .await
            .unwrap();
        store
            .upsert_node(&NodeRef::product("P1"), &product("Bread"))
            .await
            .unwrap();
        let rel = store
            .append_relationship(NewRelationship::new(
                RelationshipKind::Sells,
                NodeRef::business("B1"),
                NodeRef::product("P1"),
                TransactionPayload::new(20.0, Utc::now()),
            ))
            .await
            .unwrap();
        (store, rel)
    }

    #[tokio::test]
    async fn test_upsert_outcomes() {
        let store = InMemoryGraphStore::new();
        let node = NodeRef::business("B1");

        assert_eq!(
            store.upsert_node(&node, &business("Spaza")).await.unwrap(),
            UpsertOutcome::Created
        );
        assert_eq!(
            store.upsert_node(&node, &business("Spaza")).await.unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(
            store.upsert_node(&node, &business("Spaza Deluxe")).await.unwrap(),
            UpsertOutcome::Updated
        );

        let stored = store.get_node(&node).await.unwrap().unwrap();
        assert_eq!(stored.attributes.display_name(), Some("Spaza Deluxe"));
        assert_eq!(store.stats().await.unwrap().total_nodes, 1);
    }

    #[tokio::test]
    async fn test_insert_node_rejects_duplicate() {
        let store = InMemoryGraphStore::new();
        let node = NodeRef::product("P1");

        store.insert_node(&node, &product("Bread")).await.unwrap();
        let err = store.insert_node(&node, &product("Bread")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateNode(_)));
    }

    #[tokio::test]
    async fn test_same_id_different_kind_are_distinct() {
        let store = InMemoryGraphStore::new();
        store
            .upsert_node(&NodeRef::business("X"), &business("X"))
            .await
            .unwrap();
        store
            .upsert_node(
                &NodeRef::manufacturer("X"),
                &NodeAttributes::Manufacturer(OrganisationAttributes::new("X")),
            )
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_nodes, 2);
    }

    #[tokio::test]
    async fn test_append_links_both_endpoints() {
        let (store, rel) = store_with_sale().await;

        let out = store
            .neighbors(&NodeRef::business("B1"), RelationshipKind::Sells, Direction::Outgoing)
            .await
            .unwrap();
        let inc = store
            .neighbors(&NodeRef::product("P1"), RelationshipKind::Sells, Direction::Incoming)
            .await
            .unwrap();
        assert_eq!(out.into_vec(), vec![rel.clone()]);
        assert_eq!(inc.into_vec(), vec![rel.clone()]);

        let fetched = store.get_relationship(&rel.id).await.unwrap().unwrap();
        assert_eq!(fetched, rel);
    }

    #[tokio::test]
    async fn test_append_requires_endpoints() {
        let store = InMemoryGraphStore::new();
        store
            .upsert_node(&NodeRef::business("B1"), &business("Spaza"))
            .await
            .unwrap();

        let err = store
            .append_relationship(NewRelationship::new(
                RelationshipKind::Sells,
                NodeRef::business("B1"),
                NodeRef::product("P404"),
                TransactionPayload::new(1.0, Utc::now()),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeNotFound(_)));

        let out = store
            .neighbors(&NodeRef::business("B1"), RelationshipKind::Sells, Direction::Outgoing)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_relationships_are_never_deduplicated() {
        let (store, _) = store_with_sale().await;
        let date = Utc::now();
        for _ in 0..2 {
            store
                .append_relationship(NewRelationship::new(
                    RelationshipKind::Sells,
                    NodeRef::business("B1"),
                    NodeRef::product("P1"),
                    TransactionPayload::new(20.0, date),
                ))
                .await
                .unwrap();
        }

        let out = store
            .neighbors(&NodeRef::business("B1"), RelationshipKind::Sells, Direction::Outgoing)
            .await
            .unwrap();
        let sequences: Vec<u64> = out.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_neighbors_snapshot_ignores_later_writes() {
        let (store, _) = store_with_sale().await;
        let snapshot = store
            .neighbors(&NodeRef::business("B1"), RelationshipKind::Sells, Direction::Outgoing)
            .await
            .unwrap();

        store
            .append_relationship(NewRelationship::new(
                RelationshipKind::Sells,
                NodeRef::business("B1"),
                NodeRef::product("P1"),
                TransactionPayload::new(5.0, Utc::now()),
            ))
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        let fresh = store
            .neighbors(&NodeRef::business("B1"), RelationshipKind::Sells, Direction::Both)
            .await
            .unwrap();
        assert_eq!(fresh.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let (store, _) = store_with_sale().await;
        store.close().await.unwrap();

        let err = store.get_node(&NodeRef::business("B1")).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_consistent() {
        let (store, _) = store_with_sale().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .append_relationship(NewRelationship::new(
                        RelationshipKind::Sells,
                        NodeRef::business("B1"),
                        NodeRef::product("P1"),
                        TransactionPayload::new(i as f64, Utc::now()),
                    ))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let out = store
            .neighbors(&NodeRef::business("B1"), RelationshipKind::Sells, Direction::Outgoing)
            .await
            .unwrap();
        let inc = store
            .neighbors(&NodeRef::product("P1"), RelationshipKind::Sells, Direction::Incoming)
            .await
            .unwrap();
        assert_eq!(out.len(), 17);
        let out_ids: Vec<_> = out.iter().map(|r| r.id).collect();
        let in_ids: Vec<_> = inc.iter().map(|r| r.id).collect();
        assert_eq!(out_ids, in_ids);
    }
}
