//! Graph store trait
//!
//! This module defines the storage contract for the provenance graph. The
//! trait abstracts over backends (in-memory, SQLite); both keep an identity
//! index keyed by `(kind, id)` and an adjacency index keyed by
//! `(node, relationship kind, direction)`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::node::{Node, NodeAttributes, NodeKind, NodeRef};
use super::relationship::{
    Direction, NewRelationship, Relationship, RelationshipId, RelationshipKind,
};

/// Storage contract for nodes and relationship instances
///
/// Implementations must be safe to share between tasks. Mutations are
/// serialized; reads may run concurrently and observe every write that
/// completed before they started.
#[async_trait]
pub trait GraphStore: Send + Sync {
    // ========== Node Operations ==========

    /// Create a node or update its attributes
    ///
    /// Idempotent: repeating a call with identical attributes reports
    /// `Unchanged` and leaves the store as it was.
    async fn upsert_node(&self, node: &NodeRef, attributes: &NodeAttributes)
    -> Result<UpsertOutcome>;

    /// Create a node, failing with `DuplicateNode` if it already exists
    async fn insert_node(&self, node: &NodeRef, attributes: &NodeAttributes) -> Result<()>;

    /// Look up a node through the identity index
    async fn get_node(&self, node: &NodeRef) -> Result<Option<Node>>;

    // ========== Relationship Operations ==========

    /// Append a relationship instance to both endpoints' adjacency indexes
    ///
    /// Either both endpoints see the instance or neither does. Fails with
    /// `NodeNotFound` if an endpoint is missing.
    async fn append_relationship(&self, relationship: NewRelationship) -> Result<Arc<Relationship>>;

    /// Get a relationship instance by id
    async fn get_relationship(&self, id: &RelationshipId) -> Result<Option<Arc<Relationship>>>;

    /// Snapshot of a node's adjacency list for one kind and direction
    ///
    /// Ordered by insertion sequence. The snapshot reflects the store at call
    /// time and is unaffected by later writes.
    async fn neighbors(
        &self,
        node: &NodeRef,
        kind: RelationshipKind,
        direction: Direction,
    ) -> Result<Neighbors>;

    // ========== Lifecycle ==========

    /// Node and relationship counts
    async fn stats(&self) -> Result<GraphStats>;

    /// Release backend resources; later calls fail
    async fn close(&self) -> Result<()>;
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Finite, restartable sequence of relationship instances
#[derive(Debug, Clone, Default)]
pub struct Neighbors {
    relationships: Vec<Arc<Relationship>>,
}

impl Neighbors {
    pub fn new(relationships: Vec<Arc<Relationship>>) -> Self {
        Self { relationships }
    }

    /// Merge two sequence-ordered lists, dropping instances present in both
    pub fn merge(outgoing: Vec<Arc<Relationship>>, incoming: Vec<Arc<Relationship>>) -> Self {
        let mut merged = Vec::with_capacity(outgoing.len() + incoming.len());
        let mut out = outgoing.into_iter().peekable();
        let mut inc = incoming.into_iter().peekable();

        loop {
            let next = match (out.peek(), inc.peek()) {
                (Some(a), Some(b)) if a.sequence == b.sequence => {
                    inc.next();
                    out.next()
                }
                (Some(a), Some(b)) if a.sequence < b.sequence => out.next(),
                (Some(_), Some(_)) => inc.next(),
                (Some(_), None) => out.next(),
                (None, Some(_)) => inc.next(),
                (None, None) => break,
            };
            merged.extend(next);
        }

        Self::new(merged)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Relationship>> {
        self.relationships.iter()
    }

    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    pub fn into_vec(self) -> Vec<Arc<Relationship>> {
        self.relationships
    }
}

impl IntoIterator for Neighbors {
    type Item = Arc<Relationship>;
    type IntoIter = std::vec::IntoIter<Arc<Relationship>>;

    fn into_iter(self) -> Self::IntoIter {
        self.relationships.into_iter()
    }
}

impl<'a> IntoIterator for &'a Neighbors {
    type Item = &'a Arc<Relationship>;
    type IntoIter = std::slice::Iter<'a, Arc<Relationship>>;

    fn into_iter(self) -> Self::IntoIter {
        self.relationships.iter()
    }
}

/// Statistics about the provenance graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Total number of nodes
    pub total_nodes: u64,
    /// Total number of relationship instances
    pub total_relationships: u64,
    /// Nodes by kind
    pub nodes_by_kind: BTreeMap<NodeKind, u64>,
    /// Relationships by kind
    pub relationships_by_kind: BTreeMap<RelationshipKind, u64>,
}
