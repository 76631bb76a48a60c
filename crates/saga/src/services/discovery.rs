//! Edge discovery service trait and in-memory implementation.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use common::{Context, EntityId};
use domain::{DomainError, Node, Repository, StoreRepository};
use store::ItemStore;
use thiserror::Error;

/// A node the new node should be linked to.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeCandidate {
    pub target: EntityId,
    /// Relation strength in `(0, 1]`.
    pub weight: f64,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("edge discovery unavailable: {0}")]
    Unavailable(String),

    #[error("edge discovery cancelled")]
    Cancelled,

    #[error("edge discovery lookup failed: {0}")]
    Lookup(#[from] DomainError),
}

/// Finds related nodes for a newly created node.
#[async_trait]
pub trait EdgeDiscoveryService: Send + Sync {
    async fn discover(&self, ctx: &Context, node: &Node) -> Result<Vec<EdgeCandidate>, DiscoveryError>;
}

/// Discovery by keyword overlap with the other nodes of the same graph.
///
/// The weight of a candidate is the Jaccard similarity of the two keyword
/// sets. Nodes sharing no keyword are not candidates.
#[derive(Clone)]
pub struct InMemoryEdgeDiscovery<S: ItemStore + Clone> {
    nodes: StoreRepository<S, Node>,
    max_edges: usize,
    failing: Arc<AtomicU32>,
}

impl<S: ItemStore + Clone> InMemoryEdgeDiscovery<S> {
    /// Default cap on candidates returned per node.
    pub const DEFAULT_MAX_EDGES: usize = 5;

    pub fn new(store: S) -> Self {
        Self {
            nodes: StoreRepository::new(store),
            max_edges: Self::DEFAULT_MAX_EDGES,
            failing: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_max_edges(mut self, max_edges: usize) -> Self {
        self.max_edges = max_edges;
        self
    }

    /// Makes the next `count` discoveries fail.
    pub fn fail_next(&self, count: u32) {
        self.failing.store(count, Ordering::SeqCst);
    }

    /// Makes every discovery fail until [`fail_next`](Self::fail_next)
    /// resets it.
    pub fn fail_always(&self) {
        self.failing.store(u32::MAX, Ordering::SeqCst);
    }
}

fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let shared = a.intersection(b).count();
    if shared == 0 {
        return 0.0;
    }
    shared as f64 / a.union(b).count() as f64
}

#[async_trait]
impl<S: ItemStore + Clone> EdgeDiscoveryService for InMemoryEdgeDiscovery<S> {
    #[tracing::instrument(skip(self, ctx, node), fields(node_id = %node.id))]
    async fn discover(&self, ctx: &Context, node: &Node) -> Result<Vec<EdgeCandidate>, DiscoveryError> {
        let should_fail = self
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(DiscoveryError::Unavailable("similarity index timed out".to_string()));
        }
        if ctx.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }

        let keywords: HashSet<&str> = node.keywords.iter().map(String::as_str).collect();
        let others = self.nodes.list().await?;

        let mut candidates: Vec<EdgeCandidate> = others
            .iter()
            .filter(|other| other.graph_id == node.graph_id && other.id != node.id)
            .filter_map(|other| {
                let theirs: HashSet<&str> = other.keywords.iter().map(String::as_str).collect();
                let weight = jaccard(&keywords, &theirs);
                (weight > 0.0).then_some(EdgeCandidate {
                    target: other.id,
                    weight,
                })
            })
            .collect();

        candidates.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        candidates.truncate(self.max_edges);
        tracing::debug!(candidates = candidates.len(), "edge candidates found");
        Ok(candidates)
    }
}
