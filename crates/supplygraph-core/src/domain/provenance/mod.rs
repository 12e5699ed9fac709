//! Provenance queries
//!
//! Fixed traversal patterns answering supply-chain questions:
//!
//! - `trace_product_provenance`: which manufacturers supplied a product to
//!   the businesses that sell it
//! - `trace_product_demand`: which citizens bought from those businesses
//! - `trace_purchase_origin`: which manufacturers stand behind a citizen's
//!   purchase of a product

mod rows;
mod service;

pub use rows::{DemandRow, OriginRow, ProvenanceRow};
pub use service::ProvenanceQueryService;
