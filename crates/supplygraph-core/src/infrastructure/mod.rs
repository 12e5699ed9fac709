//! Infrastructure layer
//!
//! Contains the storage-backed implementations of domain traits.

pub mod graph;
