//! Basket ingestion
//!
//! Producers post one basket per checkout:
//!
//! ```json
//! {"businessRegID": "B1", "citizenID": "C1", "products": {"P1": 2, "P2": 3}, "time": "2025-02-10T09:00:00Z"}
//! ```
//!
//! `products` maps product ids to whole units bought. A basket becomes one
//! PURCHASED_FROM carrying the total units (and the paid `amount`, when the
//! producer sends one) plus one PURCHASED_PRODUCT per line carrying that
//! line's units, all stamped with `time` or the ingest time. The whole
//! basket is validated before the first write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use crate::domain::graph::{
    NodeRef, RelationshipId, RelationshipKind, TransactionPayload, TransactionRequest,
    parse_timestamp,
};
use crate::error::{Error, Result};

use super::graph::ProvenanceGraph;

/// A citizen's checkout at a business
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketPayload {
    #[serde(rename = "businessRegID")]
    pub business_id: String,
    #[serde(rename = "citizenID")]
    pub citizen_id: String,
    /// Product id to units bought
    pub products: BTreeMap<String, u32>,
    /// Total paid for the basket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl BasketPayload {
    /// Parse one basket from JSON
    pub fn from_json(line: &str) -> Result<Self> {
        serde_json::from_str(line)
            .map_err(|e| Error::InvalidInput(format!("malformed basket: {}", e)))
    }

    /// Basket timestamp, or `now` when the producer sent none
    pub fn timestamp(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match &self.time {
            Some(time) => parse_timestamp(time),
            None => Ok(now),
        }
    }

    /// Units across all lines
    pub fn total_units(&self) -> Result<u32> {
        self.products.values().try_fold(0u32, |total, &units| {
            total
                .checked_add(units)
                .ok_or_else(|| Error::InvalidInput("basket unit total overflows".to_string()))
        })
    }
}

/// Ids of the relationships written for one basket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasketReceipt {
    pub purchase: RelationshipId,
    pub lines: Vec<RelationshipId>,
}

/// A basket line that could not be ingested
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestFailure {
    /// 1-based line number in the input
    pub line: usize,
    pub code: String,
    pub message: String,
    /// Storage or I/O trouble; the same line may succeed on a rerun
    pub retryable: bool,
}

/// Outcome of a bulk ingest
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub baskets: usize,
    pub relationships: usize,
    pub skipped_blank: usize,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Record one basket
pub async fn ingest_basket(
    graph: &ProvenanceGraph,
    basket: &BasketPayload,
) -> Result<BasketReceipt> {
    let date = basket.timestamp(Utc::now())?;
    let citizen = NodeRef::citizen(&basket.citizen_id);
    let business = NodeRef::business(&basket.business_id);

    if basket.products.is_empty() {
        return Err(Error::InvalidInput("basket has no products".to_string()));
    }
    if let Some((product_id, _)) = basket.products.iter().find(|(_, units)| **units == 0) {
        return Err(Error::InvalidInput(format!(
            "product {} has zero units",
            product_id
        )));
    }
    let total_units = basket.total_units()?;

    // Resolve every endpoint and payload up front so a bad line writes nothing
    let mut requests = Vec::with_capacity(basket.products.len() + 1);
    requests.push(TransactionRequest::new(
        RelationshipKind::PurchasedFrom,
        citizen.clone(),
        business.clone(),
        TransactionPayload::new(basket.amount.unwrap_or(0.0), date).with_quantity(total_units),
    ));
    for (product_id, units) in &basket.products {
        requests.push(TransactionRequest::new(
            RelationshipKind::PurchasedProduct,
            citizen.clone(),
            NodeRef::product(product_id),
            TransactionPayload::new(0.0, date)
                .with_quantity(*units)
                .with_product(product_id),
        ));
    }
    for request in &requests {
        for endpoint in [&request.source, &request.target] {
            graph.get_node(endpoint).await?;
        }
        graph.registry().validate_relationship(
            request.kind,
            request.source.kind,
            request.target.kind,
            &request.payload,
        )?;
    }

    let mut ids = Vec::with_capacity(requests.len());
    for request in requests {
        ids.push(graph.record(request).await?.id);
    }
    let purchase = ids.remove(0);

    info!(
        citizen = %basket.citizen_id,
        business = %basket.business_id,
        lines = ids.len(),
        units = total_units,
        "Basket ingested"
    );
    Ok(BasketReceipt {
        purchase,
        lines: ids,
    })
}

/// Ingest newline-delimited baskets, reporting failures per line
pub async fn ingest_jsonl<R>(graph: &ProvenanceGraph, reader: R) -> Result<IngestReport>
where
    R: AsyncBufRead + Unpin,
{
    let mut report = IngestReport::default();
    let mut lines = reader.lines();
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            report.skipped_blank += 1;
            continue;
        }

        let outcome = match BasketPayload::from_json(&line) {
            Ok(basket) => ingest_basket(graph, &basket).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(receipt) => {
                report.baskets += 1;
                report.relationships += 1 + receipt.lines.len();
            }
            Err(e) => {
                warn!(line = line_number, error = %e, "Basket rejected");
                report.failures.push(IngestFailure {
                    line: line_number,
                    code: e.code().to_string(),
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                });
            }
        }
    }

    info!(
        baskets = report.baskets,
        relationships = report.relationships,
        failures = report.failures.len(),
        "Bulk ingest finished"
    );
    Ok(report)
}
