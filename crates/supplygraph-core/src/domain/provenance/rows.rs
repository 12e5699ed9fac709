//! Flattened result rows of the provenance queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::graph::{Relationship, TraversalPath};

/// One supply delivery behind a product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRow {
    pub manufacturer_id: String,
    pub business_id: String,
    pub product_id: String,
    /// Amount of the SUPPLIES_TO delivery
    pub amount: f64,
    pub quantity: u32,
    pub date: DateTime<Utc>,
}

/// One citizen purchase at a business selling the product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandRow {
    pub citizen_id: String,
    pub business_id: String,
    pub product_id: String,
    /// Amount of the PURCHASED_FROM transaction
    pub amount: f64,
    pub quantity: u32,
    pub date: DateTime<Utc>,
}

/// A citizen purchase traced back to a manufacturer of the product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginRow {
    pub citizen_id: String,
    pub business_id: String,
    pub manufacturer_id: String,
    pub product_id: String,
    /// Amount of the citizen's purchase
    pub amount: f64,
    pub quantity: u32,
    pub date: DateTime<Utc>,
}

/// Relationship traversed by hop `index`, paired with the node it reached
pub(super) fn hop(path: &TraversalPath, index: usize) -> Option<(&str, &Relationship)> {
    path.hop(index)
        .map(|hop| (hop.node.id.as_str(), hop.relationship.as_ref()))
}
