//! Provenance graph domain module
//!
//! This module implements the typed property graph behind transaction
//! provenance:
//!
//! - **Schema registry**: which node kinds exist and which relationship kinds
//!   may connect them, with their attribute and payload rules
//! - **Graph store**: identity index plus per-node adjacency index
//! - **Transaction writer**: validated, atomic recording of trade events
//! - **Traversal engine**: bounded, typed multi-hop path queries
//!
//! ## Data Model
//!
//! ```text
//! Citizen      ──PURCHASED_FROM────▶ Business
//! Citizen      ──PURCHASED_PRODUCT─▶ Product
//! Business     ──SELLS─────────────▶ Product
//! Manufacturer ──SUPPLIES_TO───────▶ Business
//! Product      ──PRODUCED_BY───────▶ Manufacturer
//! ```
//!
//! Every edge is a relationship instance carrying `amount`, `date`,
//! `quantity` and an optional product reference.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use supplygraph_core::domain::graph::{TraversalQuery, TraversalStep, RelationshipKind, NodeRef};
//!
//! let query = TraversalQuery::from_node(NodeRef::product("P1"), 2)
//!     .step(TraversalStep::outgoing(RelationshipKind::ProducedBy))
//!     .step(TraversalStep::outgoing(RelationshipKind::SuppliesTo));
//! let paths = engine.collect(query).await?;
//! ```

mod event;
mod node;
mod relationship;
mod schema;
mod store;
mod traversal;
mod writer;

pub use event::GraphEvent;
pub use node::{
    AttributeType, AttributeValue, CitizenAttributes, Node, NodeAttributes, NodeKind, NodeRef,
    OrganisationAttributes, ProductAttributes,
};
pub use relationship::{
    Direction, NewRelationship, Relationship, RelationshipId, RelationshipKind,
    TransactionPayload, parse_timestamp,
};
pub use schema::{
    AttributeSpec, NodeKindSpec, PayloadSpec, RelationshipKindSpec, SchemaRegistry,
    SchemaRegistryBuilder,
};
pub use store::{GraphStats, GraphStore, Neighbors, UpsertOutcome};
pub use traversal::{
    DEFAULT_MAX_HOPS, DEFAULT_MAX_HOPS_LIMIT, EdgePredicate, PathHop, PathStream, SortKey,
    TraversalEngine, TraversalPath, TraversalQuery, TraversalStep,
};
pub use writer::{TransactionRequest, TransactionWriter};
