//! Domain events for the provenance graph
//!
//! Events are broadcast after a write has become visible. They are an audit
//! feed for collaborators, never a substitute for the write's own result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::NodeRef;
use super::relationship::{Relationship, RelationshipId, RelationshipKind};
use super::store::UpsertOutcome;

/// Events that can occur in the provenance graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GraphEvent {
    /// A node was created or its attributes changed
    NodeRegistered {
        node: NodeRef,
        outcome: UpsertOutcome,
        timestamp: DateTime<Utc>,
    },
    /// A transaction was recorded as a relationship instance
    TransactionRecorded {
        relationship_id: RelationshipId,
        kind: RelationshipKind,
        source: NodeRef,
        target: NodeRef,
        amount: f64,
        date: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
}

impl GraphEvent {
    pub fn node_registered(node: NodeRef, outcome: UpsertOutcome) -> Self {
        Self::NodeRegistered {
            node,
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn transaction_recorded(relationship: &Relationship) -> Self {
        Self::TransactionRecorded {
            relationship_id: relationship.id,
            kind: relationship.kind,
            source: relationship.source.clone(),
            target: relationship.target.clone(),
            amount: relationship.payload.amount,
            date: relationship.payload.date,
            timestamp: Utc::now(),
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::NodeRegistered { timestamp, .. }
            | Self::TransactionRecorded { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name
    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::NodeRegistered { .. } => "node_registered",
            Self::TransactionRecorded { .. } => "transaction_recorded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tag() {
        let event = GraphEvent::node_registered(NodeRef::citizen("c-1"), UpsertOutcome::Created);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"node_registered\""));
        assert_eq!(event.event_type_name(), "node_registered");
    }
}
