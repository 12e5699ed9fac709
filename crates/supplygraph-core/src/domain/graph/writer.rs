//! Transaction writer
//!
//! The only way a business event becomes a relationship instance. A request
//! is resolved and validated completely before the store is touched, so a
//! rejected request leaves no trace in either endpoint's adjacency view.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::event::GraphEvent;
use super::node::NodeRef;
use super::relationship::{NewRelationship, Relationship, RelationshipKind, TransactionPayload};
use super::schema::SchemaRegistry;
use super::store::GraphStore;

/// A business event to record
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRequest {
    pub kind: RelationshipKind,
    pub source: NodeRef,
    pub target: NodeRef,
    pub payload: TransactionPayload,
}

impl TransactionRequest {
    pub fn new(
        kind: RelationshipKind,
        source: NodeRef,
        target: NodeRef,
        payload: TransactionPayload,
    ) -> Self {
        Self {
            kind,
            source,
            target,
            payload,
        }
    }

    /// Build a request from bare ids, taking endpoint kinds from the registry
    pub fn from_ids(
        registry: &SchemaRegistry,
        kind: RelationshipKind,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        payload: TransactionPayload,
    ) -> Result<Self> {
        let spec = registry.relationship_spec(kind).ok_or_else(|| {
            Error::SchemaViolation(format!("relationship kind {} is not declared", kind))
        })?;

        Ok(Self::new(
            kind,
            NodeRef::new(spec.source, source_id),
            NodeRef::new(spec.target, target_id),
            payload,
        ))
    }
}

/// Records transactions against a graph store
pub struct TransactionWriter<S: GraphStore + ?Sized> {
    store: Arc<S>,
    registry: Arc<SchemaRegistry>,
    events: Option<broadcast::Sender<GraphEvent>>,
}

impl<S: GraphStore + ?Sized> TransactionWriter<S> {
    pub fn new(store: Arc<S>, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            store,
            registry,
            events: None,
        }
    }

    /// Publish a `TransactionRecorded` event after each successful write
    pub fn with_events(mut self, events: broadcast::Sender<GraphEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Record one transaction
    ///
    /// 1. Resolve both endpoints through the identity index (`NodeNotFound`)
    /// 2. Validate kind, endpoint kinds and payload (`SchemaViolation`)
    /// 3. Append to the store as a single atomic unit
    pub async fn record(&self, request: TransactionRequest) -> Result<Arc<Relationship>> {
        let TransactionRequest {
            kind,
            source,
            target,
            payload,
        } = request;

        for endpoint in [&source, &target] {
            if self.store.get_node(endpoint).await?.is_none() {
                debug!(node = %endpoint, kind = %kind, "Rejected transaction: endpoint missing");
                return Err(Error::NodeNotFound(endpoint.to_string()));
            }
        }

        self.registry
            .validate_relationship(kind, source.kind, target.kind, &payload)?;

        let relationship = self
            .store
            .append_relationship(NewRelationship::new(kind, source, target, payload))
            .await?;

        info!(
            relationship_id = %relationship.id,
            kind = %relationship.kind,
            source = %relationship.source,
            target = %relationship.target,
            amount = relationship.payload.amount,
            "Transaction recorded"
        );

        if let Some(events) = &self.events {
            // No subscribers is not a failure of the write
            let _ = events.send(GraphEvent::transaction_recorded(&relationship));
        }

        Ok(relationship)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::node::{
        CitizenAttributes, NodeAttributes, OrganisationAttributes,
    };
    use crate::domain::graph::relationship::Direction;
    use crate::infrastructure::graph::InMemoryGraphStore;
    use chrono::{TimeZone, Utc};

    async fn setup() -> (Arc<InMemoryGraphStore>, TransactionWriter<InMemoryGraphStore>) {
        let store = Arc::new(InMemoryGraphStore::new());
        store
            .upsert_node(
                &NodeRef::citizen("C1"),
                &NodeAttributes::Citizen(CitizenAttributes::new()),
            )
            .await
            .unwrap();
        store
            .upsert_node(
                &NodeRef::business("B1"),
                &NodeAttributes::Business(OrganisationAttributes::new("Spaza")),
            )
            .await
            .unwrap();

        let writer = TransactionWriter::new(store.clone(), Arc::new(SchemaRegistry::standard()));
        (store, writer)
    }

    fn payload(amount: f64) -> TransactionPayload {
        TransactionPayload::new(amount, Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_record_visible_from_both_endpoints() {
        let (store, writer) = setup().await;

        let rel = writer
            .record(TransactionRequest::new(
                RelationshipKind::PurchasedFrom,
                NodeRef::citizen("C1"),
                NodeRef::business("B1"),
                payload(42.5),
            ))
            .await
            .unwrap();

        let out = store
            .neighbors(
                &NodeRef::citizen("C1"),
                RelationshipKind::PurchasedFrom,
                Direction::Outgoing,
            )
            .await
            .unwrap();
        let inc = store
            .neighbors(
                &NodeRef::business("B1"),
                RelationshipKind::PurchasedFrom,
                Direction::Incoming,
            )
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(inc.len(), 1);
        assert_eq!(out.iter().next().unwrap().id, rel.id);
        assert_eq!(inc.iter().next().unwrap().id, rel.id);
    }

    #[tokio::test]
    async fn test_wrong_endpoint_kinds_leave_store_unchanged() {
        let (store, writer) = setup().await;

        let err = writer
            .record(TransactionRequest::new(
                RelationshipKind::PurchasedFrom,
                NodeRef::business("B1"),
                NodeRef::citizen("C1"),
                payload(10.0),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_relationships, 0);
        for direction in [Direction::Outgoing, Direction::Incoming] {
            for node in [NodeRef::citizen("C1"), NodeRef::business("B1")] {
                let neighbors = store
                    .neighbors(&node, RelationshipKind::PurchasedFrom, direction)
                    .await
                    .unwrap();
                assert!(neighbors.is_empty());
            }
        }
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() {
        let (store, writer) = setup().await;

        let err = writer
            .record(TransactionRequest::new(
                RelationshipKind::PurchasedFrom,
                NodeRef::citizen("C1"),
                NodeRef::business("B1"),
                payload(-5.0),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
        assert_eq!(store.stats().await.unwrap().total_relationships, 0);
    }

    #[tokio::test]
    async fn test_missing_endpoint() {
        let (_store, writer) = setup().await;

        let err = writer
            .record(TransactionRequest::new(
                RelationshipKind::PurchasedFrom,
                NodeRef::citizen("ghost"),
                NodeRef::business("B1"),
                payload(5.0),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeNotFound(ref node) if node == "citizen:ghost"));
    }

    #[tokio::test]
    async fn test_events_published() {
        let (_store, writer) = setup().await;
        let (tx, mut rx) = broadcast::channel(8);
        let writer = writer.with_events(tx);

        let rel = writer
            .record(TransactionRequest::new(
                RelationshipKind::PurchasedFrom,
                NodeRef::citizen("C1"),
                NodeRef::business("B1"),
                payload(1.0),
            ))
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            GraphEvent::TransactionRecorded {
                relationship_id, ..
            } => assert_eq!(relationship_id, rel.id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_request_from_ids() {
        let registry = SchemaRegistry::standard();
        let request = TransactionRequest::from_ids(
            &registry,
            RelationshipKind::SuppliesTo,
            "M1",
            "B1",
            payload(100.0),
        )
        .unwrap();
        assert_eq!(request.source, NodeRef::manufacturer("M1"));
        assert_eq!(request.target, NodeRef::business("B1"));
    }
}
