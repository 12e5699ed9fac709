//! SupplyGraph Core Library
//!
//! This crate provides the transaction provenance graph:
//! - Schema registry for node and relationship kinds
//! - Graph stores (in-memory and SQLite)
//! - Transaction writer with schema-on-write validation
//! - Bounded, streaming traversal engine
//! - Provenance queries (supply chain, demand, purchase origin)
//! - Basket ingestion and configuration

pub mod commands;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::commands::{BasketPayload, IngestReport, ProvenanceGraph};
    pub use crate::config::Config;
    pub use crate::domain::graph::{
        Direction, EdgePredicate, NodeAttributes, NodeKind, NodeRef, RelationshipKind,
        SchemaRegistry, SortKey, TransactionPayload, TraversalQuery, TraversalStep,
    };
    pub use crate::domain::provenance::{DemandRow, OriginRow, ProvenanceRow};
    pub use crate::error::{Error, Result};
}
