//! Node types for the provenance graph
//!
//! Nodes are the participants of the trade network: citizens, businesses,
//! manufacturers and products. Each kind carries a fixed, typed attribute
//! set rather than open-ended properties.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kinds of nodes in the provenance graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A private buyer registered with the identity store
    Citizen,
    /// A retailer selling products to citizens
    Business,
    /// A producer supplying businesses
    Manufacturer,
    /// A traded product
    Product,
}

impl NodeKind {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Citizen => "citizen",
            Self::Business => "business",
            Self::Manufacturer => "manufacturer",
            Self::Product => "product",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "citizen" => Some(Self::Citizen),
            "business" => Some(Self::Business),
            "manufacturer" | "mfr" => Some(Self::Manufacturer),
            "product" => Some(Self::Product),
            _ => None,
        }
    }

    /// Get all node kinds
    pub fn all() -> &'static [NodeKind] {
        &[
            Self::Citizen,
            Self::Business,
            Self::Manufacturer,
            Self::Product,
        ]
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a node: its kind plus the durable id issued by the identity store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub id: String,
}

impl NodeRef {
    pub fn new(kind: NodeKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn citizen(id: impl Into<String>) -> Self {
        Self::new(NodeKind::Citizen, id)
    }

    pub fn business(id: impl Into<String>) -> Self {
        Self::new(NodeKind::Business, id)
    }

    pub fn manufacturer(id: impl Into<String>) -> Self {
        Self::new(NodeKind::Manufacturer, id)
    }

    pub fn product(id: impl Into<String>) -> Self {
        Self::new(NodeKind::Product, id)
    }

    /// Parse a `kind:id` reference
    ///
    /// When the string has no kind prefix, `default_kind` is used. Ids may
    /// themselves contain colons; only the first segment is checked for a kind.
    pub fn parse(s: &str, default_kind: Option<NodeKind>) -> Result<Self> {
        let s = s.trim();
        if let Some((prefix, rest)) = s.split_once(':') {
            if let Some(kind) = NodeKind::parse(prefix) {
                return Self::checked(kind, rest);
            }
        }

        match default_kind {
            Some(kind) => Self::checked(kind, s),
            None => Err(Error::InvalidInput(format!(
                "'{}' is not a node reference; expected <kind>:<id>",
                s
            ))),
        }
    }

    fn checked(kind: NodeKind, id: &str) -> Result<Self> {
        if id.trim().is_empty() {
            return Err(Error::InvalidInput(format!("empty {} id", kind)));
        }
        Ok(Self::new(kind, id.trim()))
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Integer(i64),
    Float(f64),
    String(String),
}

/// Value types an attribute may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Integer,
    Float,
}

impl AttributeValue {
    pub fn value_type(&self) -> AttributeType {
        match self {
            Self::Integer(_) => AttributeType::Integer,
            Self::Float(_) => AttributeType::Float,
            Self::String(_) => AttributeType::String,
        }
    }
}

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
        };
        write!(f, "{}", name)
    }
}

/// Attributes of a citizen node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitizenAttributes {
    /// Public uuid issued at registration
    pub citizen_uuid: Option<String>,
    /// Row id in the identity store
    pub account_id: Option<i64>,
}

impl CitizenAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_citizen_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.citizen_uuid = Some(uuid.into());
        self
    }

    pub fn with_account_id(mut self, account_id: i64) -> Self {
        self.account_id = Some(account_id);
        self
    }
}

/// Attributes shared by businesses and manufacturers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganisationAttributes {
    /// Display name
    pub name: String,
    /// Company registration number
    pub registration_id: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl OrganisationAttributes {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_registration_id(mut self, registration_id: impl Into<String>) -> Self {
        self.registration_id = Some(registration_id.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }
}

/// Attributes of a product node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductAttributes {
    pub name: String,
}

impl ProductAttributes {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Kind-specific attribute set of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeAttributes {
    Citizen(CitizenAttributes),
    Business(OrganisationAttributes),
    Manufacturer(OrganisationAttributes),
    Product(ProductAttributes),
}

impl NodeAttributes {
    /// The node kind these attributes belong to
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Citizen(_) => NodeKind::Citizen,
            Self::Business(_) => NodeKind::Business,
            Self::Manufacturer(_) => NodeKind::Manufacturer,
            Self::Product(_) => NodeKind::Product,
        }
    }

    /// Human-readable name, if the kind has one
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::Citizen(attrs) => attrs.citizen_uuid.as_deref(),
            Self::Business(attrs) | Self::Manufacturer(attrs) => Some(&attrs.name),
            Self::Product(attrs) => Some(&attrs.name),
        }
    }

    /// Flatten into `(name, value)` pairs for schema validation
    pub fn fields(&self) -> Vec<(&'static str, Option<AttributeValue>)> {
        match self {
            Self::Citizen(attrs) => vec![
                (
                    "citizen_uuid",
                    attrs.citizen_uuid.clone().map(AttributeValue::String),
                ),
                ("account_id", attrs.account_id.map(AttributeValue::Integer)),
            ],
            Self::Business(attrs) | Self::Manufacturer(attrs) => vec![
                ("name", Some(AttributeValue::String(attrs.name.clone()))),
                (
                    "registration_id",
                    attrs.registration_id.clone().map(AttributeValue::String),
                ),
                ("city", attrs.city.clone().map(AttributeValue::String)),
                ("latitude", attrs.latitude.map(AttributeValue::Float)),
                ("longitude", attrs.longitude.map(AttributeValue::Float)),
            ],
            Self::Product(attrs) => {
                vec![("name", Some(AttributeValue::String(attrs.name.clone())))]
            }
        }
    }
}

/// A node stored in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_ref: NodeRef,
    pub attributes: NodeAttributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(node_ref: NodeRef, attributes: NodeAttributes) -> Self {
        let now = Utc::now();
        Self {
            node_ref,
            attributes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.node_ref.kind
    }

    pub fn id(&self) -> &str {
        &self.node_ref.id
    }
}
