//! Schema registry for the provenance graph
//!
//! The registry declares which node kinds exist, which attributes they carry
//! and which relationship kinds may connect which node kinds. It is built
//! once at startup and read-only afterwards; every write is checked against
//! it before anything is mutated.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::node::{AttributeType, AttributeValue, NodeAttributes, NodeKind};
use super::relationship::{RelationshipKind, TransactionPayload};

/// Declaration of a single node attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub value_type: AttributeType,
    #[serde(default)]
    pub required: bool,
}

impl AttributeSpec {
    pub fn required(name: impl Into<String>, value_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            value_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, value_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            value_type,
            required: false,
        }
    }
}

/// Which payload fields a relationship kind may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSpec {
    /// Kind carries a monetary amount; otherwise the amount must be zero
    pub carries_amount: bool,
    /// Kind may record quantities other than 1
    pub allows_quantity: bool,
    /// Kind may reference a product
    pub allows_product_ref: bool,
}

impl PayloadSpec {
    /// Full trade payload: amount, quantity and product reference
    pub fn transaction() -> Self {
        Self {
            carries_amount: true,
            allows_quantity: true,
            allows_product_ref: true,
        }
    }

    /// Dated link without business data
    pub fn link() -> Self {
        Self {
            carries_amount: false,
            allows_quantity: false,
            allows_product_ref: false,
        }
    }
}

/// Declaration of a node kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeKindSpec {
    pub kind: NodeKind,
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
}

/// Declaration of a relationship kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipKindSpec {
    pub kind: RelationshipKind,
    pub source: NodeKind,
    pub target: NodeKind,
    pub payload: PayloadSpec,
}

/// On-disk registry document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    node_kinds: Vec<NodeKindSpec>,
    #[serde(default)]
    relationship_kinds: Vec<RelationshipKindSpec>,
}

/// Builder collecting declarations before the registry is frozen
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistryBuilder {
    node_kinds: HashMap<NodeKind, NodeKindSpec>,
    relationship_kinds: HashMap<RelationshipKind, RelationshipKindSpec>,
}

impl SchemaRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a node kind and its attributes (re-declaring replaces)
    pub fn declare_node_kind(mut self, kind: NodeKind, attributes: Vec<AttributeSpec>) -> Self {
        self.node_kinds
            .insert(kind, NodeKindSpec { kind, attributes });
        self
    }

    /// Declare a relationship kind with its allowed endpoints and payload
    pub fn declare_relationship_kind(
        mut self,
        kind: RelationshipKind,
        source: NodeKind,
        target: NodeKind,
        payload: PayloadSpec,
    ) -> Self {
        self.relationship_kinds.insert(
            kind,
            RelationshipKindSpec {
                kind,
                source,
                target,
                payload,
            },
        );
        self
    }

    /// Freeze the declarations
    ///
    /// Every relationship kind must connect declared node kinds.
    pub fn build(self) -> Result<SchemaRegistry> {
        for spec in self.relationship_kinds.values() {
            for endpoint in [spec.source, spec.target] {
                if !self.node_kinds.contains_key(&endpoint) {
                    return Err(Error::ConfigError(format!(
                        "relationship kind {} references undeclared node kind {}",
                        spec.kind, endpoint
                    )));
                }
            }
        }

        Ok(SchemaRegistry {
            node_kinds: self.node_kinds,
            relationship_kinds: self.relationship_kinds,
        })
    }
}

/// Immutable registry of node and relationship kinds
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    node_kinds: HashMap<NodeKind, NodeKindSpec>,
    relationship_kinds: HashMap<RelationshipKind, RelationshipKindSpec>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::new()
    }

    /// The trade network schema
    pub fn standard() -> Self {
        let organisation = || {
            vec![
                AttributeSpec::required("name", AttributeType::String),
                AttributeSpec::optional("registration_id", AttributeType::String),
                AttributeSpec::optional("city", AttributeType::String),
                AttributeSpec::optional("latitude", AttributeType::Float),
                AttributeSpec::optional("longitude", AttributeType::Float),
            ]
        };

        Self::builder()
            .declare_node_kind(
                NodeKind::Citizen,
                vec![
                    AttributeSpec::optional("citizen_uuid", AttributeType::String),
                    AttributeSpec::optional("account_id", AttributeType::Integer),
                ],
            )
            .declare_node_kind(NodeKind::Business, organisation())
            .declare_node_kind(NodeKind::Manufacturer, organisation())
            .declare_node_kind(
                NodeKind::Product,
                vec![AttributeSpec::required("name", AttributeType::String)],
            )
            .declare_relationship_kind(
                RelationshipKind::PurchasedFrom,
                NodeKind::Citizen,
                NodeKind::Business,
                PayloadSpec::transaction(),
            )
            .declare_relationship_kind(
                RelationshipKind::PurchasedProduct,
                NodeKind::Citizen,
                NodeKind::Product,
                PayloadSpec::transaction(),
            )
            .declare_relationship_kind(
                RelationshipKind::Sells,
                NodeKind::Business,
                NodeKind::Product,
                PayloadSpec::transaction(),
            )
            .declare_relationship_kind(
                RelationshipKind::SuppliesTo,
                NodeKind::Manufacturer,
                NodeKind::Business,
                PayloadSpec::transaction(),
            )
            .declare_relationship_kind(
                RelationshipKind::ProducedBy,
                NodeKind::Product,
                NodeKind::Manufacturer,
                PayloadSpec::link(),
            )
            .build()
            .unwrap_or_else(|_| unreachable!("standard schema declares all endpoints"))
    }

    /// Parse a registry from a TOML document
    pub fn from_toml(contents: &str) -> Result<Self> {
        let document: RegistryDocument = toml::from_str(contents)
            .map_err(|e| Error::ConfigError(format!("invalid schema registry: {}", e)))?;

        let builder = document
            .node_kinds
            .into_iter()
            .fold(Self::builder(), |builder, spec| {
                builder.declare_node_kind(spec.kind, spec.attributes)
            });

        document
            .relationship_kinds
            .into_iter()
            .fold(builder, |builder, spec| {
                builder.declare_relationship_kind(spec.kind, spec.source, spec.target, spec.payload)
            })
            .build()
    }

    /// Load a registry from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Serialize the registry to TOML (sorted for stable output)
    pub fn to_toml(&self) -> Result<String> {
        let mut node_kinds: Vec<_> = self.node_kinds.values().cloned().collect();
        node_kinds.sort_by_key(|spec| spec.kind);
        let mut relationship_kinds: Vec<_> = self.relationship_kinds.values().cloned().collect();
        relationship_kinds.sort_by_key(|spec| spec.kind);

        toml::to_string_pretty(&RegistryDocument {
            node_kinds,
            relationship_kinds,
        })
        .map_err(|e| Error::Other(format!("Failed to serialize schema registry: {}", e)))
    }

    pub fn node_spec(&self, kind: NodeKind) -> Option<&NodeKindSpec> {
        self.node_kinds.get(&kind)
    }

    pub fn relationship_spec(&self, kind: RelationshipKind) -> Option<&RelationshipKindSpec> {
        self.relationship_kinds.get(&kind)
    }

    /// Check a node's attributes against its kind declaration
    pub fn validate_node(&self, kind: NodeKind, attributes: &NodeAttributes) -> Result<()> {
        let spec = self
            .node_spec(kind)
            .ok_or_else(|| violation(format!("node kind {} is not declared", kind)))?;

        if attributes.kind() != kind {
            return Err(violation(format!(
                "{} attributes supplied for a {} node",
                attributes.kind(),
                kind
            )));
        }

        let fields = attributes.fields();

        for (name, value) in &fields {
            let Some(value) = value else { continue };
            let declared = spec
                .attributes
                .iter()
                .find(|attr| attr.name == *name)
                .ok_or_else(|| {
                    violation(format!("attribute '{}' is not declared for {}", name, kind))
                })?;

            if declared.value_type != value.value_type() {
                return Err(violation(format!(
                    "attribute '{}' of {} must be {}, got {}",
                    name,
                    kind,
                    declared.value_type,
                    value.value_type()
                )));
            }
        }

        for attr in spec.attributes.iter().filter(|attr| attr.required) {
            let present = fields.iter().any(|(name, value)| {
                *name == attr.name
                    && match value {
                        Some(AttributeValue::String(s)) => !s.trim().is_empty(),
                        Some(_) => true,
                        None => false,
                    }
            });
            if !present {
                return Err(violation(format!(
                    "required attribute '{}' missing for {}",
                    attr.name, kind
                )));
            }
        }

        Ok(())
    }

    /// Check a relationship's kind, endpoint kinds and payload
    pub fn validate_relationship(
        &self,
        kind: RelationshipKind,
        source_kind: NodeKind,
        target_kind: NodeKind,
        payload: &TransactionPayload,
    ) -> Result<()> {
        let spec = self
            .relationship_spec(kind)
            .ok_or_else(|| violation(format!("relationship kind {} is not declared", kind)))?;

        if source_kind != spec.source || target_kind != spec.target {
            return Err(violation(format!(
                "{} connects {} -> {}, got {} -> {}",
                kind, spec.source, spec.target, source_kind, target_kind
            )));
        }

        validate_payload(kind, &spec.payload, payload)
    }
}

fn validate_payload(
    kind: RelationshipKind,
    spec: &PayloadSpec,
    payload: &TransactionPayload,
) -> Result<()> {
    if !payload.amount.is_finite() || payload.amount < 0.0 {
        return Err(violation(format!(
            "amount must be a non-negative number, got {}",
            payload.amount
        )));
    }
    if !spec.carries_amount && payload.amount != 0.0 {
        return Err(violation(format!("{} does not carry an amount", kind)));
    }

    if payload.quantity < 1 {
        return Err(violation("quantity must be at least 1".to_string()));
    }
    if !spec.allows_quantity && payload.quantity != 1 {
        return Err(violation(format!("{} does not carry a quantity", kind)));
    }

    match &payload.product_id {
        Some(_) if !spec.allows_product_ref => {
            Err(violation(format!("{} does not reference a product", kind)))
        }
        Some(product_id) if product_id.trim().is_empty() => {
            Err(violation("product_id must not be empty".to_string()))
        }
        _ => Ok(()),
    }
}

fn violation(reason: String) -> Error {
    Error::SchemaViolation(reason)
}
