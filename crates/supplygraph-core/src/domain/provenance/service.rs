//! Provenance query service
//!
//! Each question is a fixed traversal pattern. Paths are flattened into rows
//! in the order the engine yields them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::domain::graph::{
    Direction, EdgePredicate, GraphStore, NodeRef, RelationshipKind, TraversalEngine,
    TraversalQuery, TraversalStep,
};
use crate::error::{Error, Result};

use super::rows::{DemandRow, OriginRow, ProvenanceRow, hop};

/// Domain questions over the provenance graph
pub struct ProvenanceQueryService<S: GraphStore + ?Sized> {
    store: Arc<S>,
    engine: TraversalEngine<S>,
}

impl<S: GraphStore + ?Sized + 'static> ProvenanceQueryService<S> {
    pub fn new(store: Arc<S>, engine: TraversalEngine<S>) -> Self {
        Self { store, engine }
    }

    /// Manufacturers that supplied `product_id` to a business selling it,
    /// with deliveries on or after `since`
    ///
    /// Product ─PRODUCED_BY→ Manufacturer ─SUPPLIES_TO→ Business, keeping a
    /// row only when the business has a SELLS edge to the product.
    pub async fn trace_product_provenance(
        &self,
        product_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProvenanceRow>> {
        let product = self.require(NodeRef::product(product_id)).await?;

        let query = TraversalQuery::from_node(product.clone(), 2)
            .step(TraversalStep::outgoing(RelationshipKind::ProducedBy).distinct())
            .step(
                TraversalStep::outgoing(RelationshipKind::SuppliesTo).with_predicate(
                    EdgePredicate::All(vec![
                        EdgePredicate::DateOnOrAfter(since),
                        EdgePredicate::ProductIsOrUnset(product_id.to_string()),
                    ]),
                ),
            );

        let mut sells_cache: HashMap<NodeRef, bool> = HashMap::new();
        let mut rows = Vec::new();
        let mut paths = self.engine.traverse(query)?;

        while let Some(path) = paths.next().await {
            let path = path?;
            let (Some((manufacturer_id, _)), Some((business_id, supply))) =
                (hop(&path, 0), hop(&path, 1))
            else {
                continue;
            };

            let business = path.terminal().clone();
            let sells = match sells_cache.get(&business) {
                Some(sells) => *sells,
                None => {
                    let sells = self.sells(&business, &product).await?;
                    sells_cache.insert(business, sells);
                    sells
                }
            };
            if !sells {
                continue;
            }

            rows.push(ProvenanceRow {
                manufacturer_id: manufacturer_id.to_string(),
                business_id: business_id.to_string(),
                product_id: product_id.to_string(),
                amount: supply.payload.amount,
                quantity: supply.payload.quantity,
                date: supply.payload.date,
            });
        }

        info!(
            product = %product_id,
            since = %since,
            rows = rows.len(),
            "Traced product provenance"
        );
        Ok(rows)
    }

    /// Citizens who bought from a business selling `product_id` on or after
    /// `since`
    ///
    /// Product ←SELLS─ Business ←PURCHASED_FROM─ Citizen
    pub async fn trace_product_demand(
        &self,
        product_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DemandRow>> {
        let product = self.require(NodeRef::product(product_id)).await?;

        let query = TraversalQuery::from_node(product, 2)
            .step(TraversalStep::incoming(RelationshipKind::Sells).distinct())
            .step(
                TraversalStep::incoming(RelationshipKind::PurchasedFrom).with_predicate(
                    EdgePredicate::All(vec![
                        EdgePredicate::DateOnOrAfter(since),
                        EdgePredicate::ProductIsOrUnset(product_id.to_string()),
                    ]),
                ),
            );

        let mut rows = Vec::new();
        let mut paths = self.engine.traverse(query)?;
        while let Some(path) = paths.next().await {
            let path = path?;
            let (Some((business_id, _)), Some((citizen_id, purchase))) =
                (hop(&path, 0), hop(&path, 1))
            else {
                continue;
            };

            rows.push(DemandRow {
                citizen_id: citizen_id.to_string(),
                business_id: business_id.to_string(),
                product_id: product_id.to_string(),
                amount: purchase.payload.amount,
                quantity: purchase.payload.quantity,
                date: purchase.payload.date,
            });
        }

        info!(product = %product_id, since = %since, rows = rows.len(), "Traced product demand");
        Ok(rows)
    }

    /// Manufacturers that could have produced `product_id` bought by
    /// `citizen_id` on or after `since`
    ///
    /// Citizen ─PURCHASED_FROM→ Business ←SUPPLIES_TO─ Manufacturer
    /// ←PRODUCED_BY─ Product
    pub async fn trace_purchase_origin(
        &self,
        citizen_id: &str,
        product_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<OriginRow>> {
        let citizen = self.require(NodeRef::citizen(citizen_id)).await?;
        let product = self.require(NodeRef::product(product_id)).await?;

        let query = TraversalQuery::from_node(citizen, 3)
            .step(
                TraversalStep::outgoing(RelationshipKind::PurchasedFrom).with_predicate(
                    EdgePredicate::All(vec![
                        EdgePredicate::DateOnOrAfter(since),
                        EdgePredicate::ProductIsOrUnset(product_id.to_string()),
                    ]),
                ),
            )
            .step(
                TraversalStep::incoming(RelationshipKind::SuppliesTo)
                    .with_predicate(EdgePredicate::ProductIsOrUnset(product_id.to_string()))
                    .distinct(),
            )
            .step(
                TraversalStep::incoming(RelationshipKind::ProducedBy)
                    .with_predicate(EdgePredicate::EndpointIs(product))
                    .distinct(),
            );

        let mut rows = Vec::new();
        let mut paths = self.engine.traverse(query)?;
        while let Some(path) = paths.next().await {
            let path = path?;
            let (Some((business_id, purchase)), Some((manufacturer_id, _))) =
                (hop(&path, 0), hop(&path, 1))
            else {
                continue;
            };

            rows.push(OriginRow {
                citizen_id: citizen_id.to_string(),
                business_id: business_id.to_string(),
                manufacturer_id: manufacturer_id.to_string(),
                product_id: product_id.to_string(),
                amount: purchase.payload.amount,
                quantity: purchase.payload.quantity,
                date: purchase.payload.date,
            });
        }

        info!(
            citizen = %citizen_id,
            product = %product_id,
            rows = rows.len(),
            "Traced purchase origin"
        );
        Ok(rows)
    }

    async fn require(&self, node: NodeRef) -> Result<NodeRef> {
        match self.store.get_node(&node).await? {
            Some(_) => Ok(node),
            None => Err(Error::NodeNotFound(node.to_string())),
        }
    }

    async fn sells(&self, business: &NodeRef, product: &NodeRef) -> Result<bool> {
        let sales = self
            .store
            .neighbors(business, RelationshipKind::Sells, Direction::Outgoing)
            .await?;
        let sells = sales.iter().any(|sale| &sale.target == product);
        if !sells {
            debug!(
                business = %business,
                product = %product,
                "Supplied business does not sell product"
            );
        }
        Ok(sells)
    }
}
