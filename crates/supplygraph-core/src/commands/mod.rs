//! Commands module - all operations as library functions
//!
//! These are the entry points used by the CLI and by embedding services.

pub mod graph;
pub mod ingest;

pub use graph::ProvenanceGraph;
pub use ingest::{
    BasketPayload, BasketReceipt, IngestFailure, IngestReport, ingest_basket, ingest_jsonl,
};
