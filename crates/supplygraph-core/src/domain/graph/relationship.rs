//! Relationship instances for the provenance graph
//!
//! A relationship is not a bare edge: every instance is one recorded trade
//! event carrying its own payload. Instances are append-only and never
//! deduplicated, so two purchases between the same pair are two edges.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::node::NodeRef;

/// Kinds of relationships between nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    /// Citizen bought from a business
    PurchasedFrom,
    /// Citizen bought a product
    PurchasedProduct,
    /// Business sold a product
    Sells,
    /// Manufacturer supplied a business
    SuppliesTo,
    /// Product is made by a manufacturer
    ProducedBy,
}

impl RelationshipKind {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PurchasedFrom => "PURCHASED_FROM",
            Self::PurchasedProduct => "PURCHASED_PRODUCT",
            Self::Sells => "SELLS",
            Self::SuppliesTo => "SUPPLIES_TO",
            Self::ProducedBy => "PRODUCED_BY",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "PURCHASED_FROM" | "PURCHASEDFROM" => Some(Self::PurchasedFrom),
            "PURCHASED_PRODUCT" | "PURCHASEDPRODUCT" => Some(Self::PurchasedProduct),
            "SELLS" => Some(Self::Sells),
            "SUPPLIES_TO" | "SUPPLIESTO" => Some(Self::SuppliesTo),
            "PRODUCED_BY" | "PRODUCEDBY" => Some(Self::ProducedBy),
            _ => None,
        }
    }

    /// Get all relationship kinds
    pub fn all() -> &'static [RelationshipKind] {
        &[
            Self::PurchasedFrom,
            Self::PurchasedProduct,
            Self::Sells,
            Self::SuppliesTo,
            Self::ProducedBy,
        ]
    }
}

impl std::fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction for adjacency lookups and traversal steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Follow edges from source to target
    Outgoing,
    /// Follow edges from target back to source
    Incoming,
    /// Follow edges either way
    Both,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "outgoing" | "out" => Some(Self::Outgoing),
            "incoming" | "in" => Some(Self::Incoming),
            "both" | "any" => Some(Self::Both),
            _ => None,
        }
    }
}

/// Identifier of a recorded relationship instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(Uuid);

impl RelationshipId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidInput(format!("invalid relationship id '{}': {}", s, e)))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RelationshipId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Business data carried by a relationship instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPayload {
    /// Monetary amount, never negative
    pub amount: f64,
    /// When the trade happened
    pub date: DateTime<Utc>,
    /// Units traded, at least 1
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Product this trade refers to, if any
    #[serde(default)]
    pub product_id: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

impl TransactionPayload {
    pub fn new(amount: f64, date: DateTime<Utc>) -> Self {
        Self {
            amount,
            date,
            quantity: default_quantity(),
            product_id: None,
        }
    }

    /// Payload for link-only kinds that carry no monetary value
    pub fn link(date: DateTime<Utc>) -> Self {
        Self::new(0.0, date)
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }
}

/// A relationship that has not been appended yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelationship {
    pub kind: RelationshipKind,
    pub source: NodeRef,
    pub target: NodeRef,
    pub payload: TransactionPayload,
}

impl NewRelationship {
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
}

/// A recorded relationship instance
///
/// Topology and payload live in the same record so an instance is either
/// visible with its data from both endpoints or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    /// Store-assigned insertion order, strictly increasing
    pub sequence: u64,
    pub kind: RelationshipKind,
    pub source: NodeRef,
    pub target: NodeRef,
    pub payload: TransactionPayload,
    pub recorded_at: DateTime<Utc>,
}

impl Relationship {
    pub fn from_new(new: NewRelationship, sequence: u64) -> Self {
        Self {
            id: RelationshipId::new(),
            sequence,
            kind: new.kind,
            source: new.source,
            target: new.target,
            payload: new.payload,
            recorded_at: Utc::now(),
        }
    }

    /// The endpoint on the other side of `from`
    pub fn opposite(&self, from: &NodeRef) -> &NodeRef {
        if &self.source == from {
            &self.target
        } else {
            &self.source
        }
    }
}

/// Parse a timestamp given either as RFC 3339 or as a plain `YYYY-MM-DD` date
///
/// Plain dates resolve to midnight UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "invalid date '{}'; expected RFC 3339 or YYYY-MM-DD",
                s
            ))
        })
}
