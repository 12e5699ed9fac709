//! Domain layer
//!
//! Contains the graph model, the traversal engine and the provenance queries
//! composed from it.

pub mod graph;
pub mod provenance;
