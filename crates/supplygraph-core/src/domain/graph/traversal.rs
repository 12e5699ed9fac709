//! Bounded pattern traversal over the provenance graph
//!
//! A query is a set of seed nodes plus an ordered list of typed steps. The
//! engine expands breadth-first, one adjacency lookup per frontier path per
//! step, and keeps the paths whose newly traversed relationship satisfies the
//! step's predicate. Work is O(out-degree of visited nodes); the store is
//! never scanned.
//!
//! Results are streamed. Intermediate frontiers are materialised, the final
//! hop is yielded as it is found, so a caller that stops polling stops the
//! traversal.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::node::NodeRef;
use super::relationship::{Direction, Relationship, RelationshipKind};
use super::store::GraphStore;

/// Upper bound on `max_hops` unless the engine is configured otherwise
pub const DEFAULT_MAX_HOPS_LIMIT: u32 = 16;

/// `max_hops` for ad-hoc queries that do not choose their own
pub const DEFAULT_MAX_HOPS: u32 = 4;

/// Stream of matched paths
pub type PathStream = Pin<Box<dyn Stream<Item = Result<TraversalPath>> + Send>>;

/// Filter applied to the relationship traversed by a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EdgePredicate {
    /// `date >= value`
    DateOnOrAfter(DateTime<Utc>),
    /// `date < value`
    DateBefore(DateTime<Utc>),
    /// `product_id == value`
    ProductIs(String),
    /// `product_id` unset or equal to value
    ProductIsOrUnset(String),
    /// `amount >= value`
    AmountAtLeast(f64),
    /// The node reached by the step is `value`
    EndpointIs(NodeRef),
    /// Every inner predicate holds
    All(Vec<EdgePredicate>),
}

impl EdgePredicate {
    /// Evaluate against a relationship and the node it leads to
    pub fn matches(&self, relationship: &Relationship, reached: &NodeRef) -> bool {
        let payload = &relationship.payload;
        match self {
            Self::DateOnOrAfter(date) => payload.date >= *date,
            Self::DateBefore(date) => payload.date < *date,
            Self::ProductIs(product) => payload.product_id.as_deref() == Some(product.as_str()),
            Self::ProductIsOrUnset(product) => payload
                .product_id
                .as_deref()
                .is_none_or(|id| id == product),
            Self::AmountAtLeast(amount) => payload.amount >= *amount,
            Self::EndpointIs(node) => reached == node,
            Self::All(predicates) => predicates
                .iter()
                .all(|predicate| predicate.matches(relationship, reached)),
        }
    }
}

/// One typed hop of a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalStep {
    pub kind: RelationshipKind,
    pub direction: Direction,
    #[serde(default)]
    pub predicate: Option<EdgePredicate>,
    /// Keep only the first relationship reaching each node from a given path
    #[serde(default)]
    pub distinct_nodes: bool,
}

impl TraversalStep {
    pub fn new(kind: RelationshipKind, direction: Direction) -> Self {
        Self {
            kind,
            direction,
            predicate: None,
            distinct_nodes: false,
        }
    }

    pub fn outgoing(kind: RelationshipKind) -> Self {
        Self::new(kind, Direction::Outgoing)
    }

    pub fn incoming(kind: RelationshipKind) -> Self {
        Self::new(kind, Direction::Incoming)
    }

    pub fn with_predicate(mut self, predicate: EdgePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct_nodes = true;
        self
    }

    fn admits(&self, relationship: &Relationship, reached: &NodeRef) -> bool {
        self.predicate
            .as_ref()
            .is_none_or(|predicate| predicate.matches(relationship, reached))
    }
}

/// Optional ordering of results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Final-hop date, oldest first
    DateAscending,
    /// Final-hop date, newest first
    DateDescending,
    /// Final-hop amount, largest first
    AmountDescending,
}

impl SortKey {
    /// Stable sort so equal keys keep adjacency order
    fn sort(&self, paths: &mut [TraversalPath]) {
        let last = |path: &TraversalPath| path.last().map(|hop| Arc::clone(&hop.relationship));
        match self {
            Self::DateAscending => paths.sort_by_key(|path| last(path).map(|r| r.payload.date)),
            Self::DateDescending => paths.sort_by(|a, b| {
                let a = last(a).map(|r| r.payload.date);
                let b = last(b).map(|r| r.payload.date);
                b.cmp(&a)
            }),
            Self::AmountDescending => paths.sort_by(|a, b| {
                let a = last(a).map_or(0.0, |r| r.payload.amount);
                let b = last(b).map_or(0.0, |r| r.payload.amount);
                b.total_cmp(&a)
            }),
        }
    }
}

/// A bounded path query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalQuery {
    pub seeds: Vec<NodeRef>,
    pub steps: Vec<TraversalStep>,
    /// Mandatory hop bound; the pattern must fit inside it
    pub max_hops: u32,
    #[serde(default)]
    pub sort: Option<SortKey>,
}

impl TraversalQuery {
    pub fn new(seeds: Vec<NodeRef>, max_hops: u32) -> Self {
        Self {
            seeds,
            steps: Vec::new(),
            max_hops,
            sort: None,
        }
    }

    /// Start from a single node
    pub fn from_node(seed: NodeRef, max_hops: u32) -> Self {
        Self::new(vec![seed], max_hops)
    }

    pub fn step(mut self, step: TraversalStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn sorted_by(mut self, key: SortKey) -> Self {
        self.sort = Some(key);
        self
    }

    fn validate(&self, max_hops_limit: u32) -> Result<()> {
        if self.max_hops == 0 {
            return Err(Error::InvalidQuery("max_hops must be at least 1".to_string()));
        }
        if self.max_hops > max_hops_limit {
            return Err(Error::InvalidQuery(format!(
                "max_hops {} exceeds the limit of {}",
                self.max_hops, max_hops_limit
            )));
        }
        if self.steps.is_empty() {
            return Err(Error::InvalidQuery("pattern has no steps".to_string()));
        }
        if self.steps.len() > self.max_hops as usize {
            return Err(Error::InvalidQuery(format!(
                "pattern has {} steps but max_hops is {}",
                self.steps.len(),
                self.max_hops
            )));
        }
        Ok(())
    }
}

/// A node reached through a relationship instance
#[derive(Debug, Clone, PartialEq)]
pub struct PathHop {
    pub node: NodeRef,
    pub relationship: Arc<Relationship>,
}

/// A matched path: the seed plus one hop per pattern step
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalPath {
    pub seed: NodeRef,
    pub hops: Vec<PathHop>,
}

impl TraversalPath {
    pub fn start(seed: NodeRef) -> Self {
        Self {
            seed,
            hops: Vec::new(),
        }
    }

    /// Node the path currently ends at
    pub fn terminal(&self) -> &NodeRef {
        self.hops.last().map_or(&self.seed, |hop| &hop.node)
    }

    pub fn last(&self) -> Option<&PathHop> {
        self.hops.last()
    }

    /// Number of hops
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn hop(&self, index: usize) -> Option<&PathHop> {
        self.hops.get(index)
    }

    fn extend(&self, node: NodeRef, relationship: Arc<Relationship>) -> Self {
        let mut hops = Vec::with_capacity(self.hops.len() + 1);
        hops.extend(self.hops.iter().cloned());
        hops.push(PathHop { node, relationship });
        Self {
            seed: self.seed.clone(),
            hops,
        }
    }
}

/// Executes traversal queries against a store
pub struct TraversalEngine<S: GraphStore + ?Sized> {
    store: Arc<S>,
    max_hops_limit: u32,
}

impl<S: GraphStore + ?Sized> Clone for TraversalEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            max_hops_limit: self.max_hops_limit,
        }
    }
}

impl<S: GraphStore + ?Sized + 'static> TraversalEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            max_hops_limit: DEFAULT_MAX_HOPS_LIMIT,
        }
    }

    pub fn with_max_hops_limit(mut self, limit: u32) -> Self {
        self.max_hops_limit = limit;
        self
    }

    pub fn max_hops_limit(&self) -> u32 {
        self.max_hops_limit
    }

    /// Start a traversal
    ///
    /// The query is checked up front; storage errors and missing seeds
    /// surface as stream items. The stream is not restartable; run the
    /// query again to iterate again.
    pub fn traverse(&self, query: TraversalQuery) -> Result<PathStream> {
        query.validate(self.max_hops_limit)?;

        let store = Arc::clone(&self.store);
        let TraversalQuery {
            seeds, steps, sort, ..
        } = query;

        let stream = async_stream::stream! {
            for seed in &seeds {
                match store.get_node(seed).await {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        yield Err(Error::NodeNotFound(seed.to_string()));
                        return;
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            let mut frontier: Vec<TraversalPath> =
                seeds.into_iter().map(TraversalPath::start).collect();
            let last_step = steps.len() - 1;

            for (depth, step) in steps.iter().enumerate() {
                let stream_final_hop = depth == last_step && sort.is_none();
                let mut next = Vec::new();

                for path in &frontier {
                    let from = path.terminal().clone();
                    let neighbors = match store.neighbors(&from, step.kind, step.direction).await {
                        Ok(neighbors) => neighbors,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    let mut reached_nodes = HashSet::new();

                    for relationship in neighbors.iter() {
                        let reached = relationship.opposite(&from);
                        if !step.admits(relationship, reached) {
                            continue;
                        }
                        if step.distinct_nodes && !reached_nodes.insert(reached.clone()) {
                            continue;
                        }

                        let extended = path.extend(reached.clone(), Arc::clone(relationship));
                        if stream_final_hop {
                            yield Ok(extended);
                        } else {
                            next.push(extended);
                        }
                    }
                }

                debug!(
                    depth = depth + 1,
                    kind = %step.kind,
                    frontier = next.len(),
                    "Traversal step expanded"
                );
                frontier = next;
            }

            if let Some(key) = sort {
                key.sort(&mut frontier);
                for path in frontier {
                    yield Ok(path);
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Run a traversal to completion
    pub async fn collect(&self, query: TraversalQuery) -> Result<Vec<TraversalPath>> {
        self.traverse(query)?.try_collect().await
    }
}
