//! The node-creation saga.
//!
//! Creating a node touches several items that must change together: the
//! user's default graph (created on first use), the node, its edges and the
//! graph's counters. The saga buffers the writes in one unit of work and
//! commits them atomically with their outbox events:
//!
//! | # | step            | on failure of a later step       |
//! |---|-----------------|----------------------------------|
//! | 1 | begin           | roll back the unit of work       |
//! | 2 | ensure_graph    | release the graph-creation lock  |
//! | 3 | create_node     |                                  |
//! | 4 | save_node       | delete the node if committed     |
//! | 5 | discover_edges  | (retried)                        |
//! | 6 | create_edges    | delete the edges if committed    |
//! | 7 | commit          |                                  |
//! | 8 | publish_events  | (retried)                        |
//! | 9 | update_metadata |                                  |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Context, EntityId};
use domain::graph::MAX_KEYWORDS;
use domain::{
    DEFAULT_GRAPH_NAME, DomainError, Edge, Entity, Graph, GraphEvent, Node, Repository,
    RollbackError, StoreRepository, TransactionalRepository, UnitOfWork, UnitOfWorkError,
    UserGraphPointer, UserId, extract_keywords,
};
use outbox::RelayHandle;
use serde::{Deserialize, Serialize};
use store::{
    DistributedLock, EventId, ItemStore, ItemStoreExt, LockError, LockOptions, OutboxRecord,
    StoreError,
};
use thiserror::Error;

use crate::builder::SagaBuilder;
use crate::executor::Saga;
use crate::retry::RetryPolicy;
use crate::services::{DiscoveryError, EdgeCandidate, EdgeDiscoveryService};
use crate::step::{SagaStep, StepSpec};

pub const SAGA_NAME: &str = "node_creation";

pub const STEP_BEGIN: &str = "begin";
pub const STEP_ENSURE_GRAPH: &str = "ensure_graph";
pub const STEP_CREATE_NODE: &str = "create_node";
pub const STEP_SAVE_NODE: &str = "save_node";
pub const STEP_DISCOVER_EDGES: &str = "discover_edges";
pub const STEP_CREATE_EDGES: &str = "create_edges";
pub const STEP_COMMIT: &str = "commit";
pub const STEP_PUBLISH_EVENTS: &str = "publish_events";
pub const STEP_UPDATE_METADATA: &str = "update_metadata";

/// Resource name of the lock serializing first-graph creation for a user.
pub fn graph_creation_resource(user_id: &UserId) -> String {
    format!("graph-create:{user_id}")
}

/// A request to add a node to the user's default graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    pub user_id: String,
    pub content: String,
    /// Extracted from the content when empty.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CreateNodeRequest {
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            content: content.into(),
            keywords: Vec::new(),
        }
    }

    pub fn with_keywords<K: Into<String>>(mut self, keywords: impl IntoIterator<Item = K>) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// What a successful run created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCreationOutcome {
    pub node: Node,
    /// The graph with its updated counters.
    pub graph: Graph,
    /// True if this run created the user's default graph.
    pub graph_created: bool,
    pub edges: Vec<Edge>,
    pub event_ids: Vec<EventId>,
}

#[derive(Debug, Error)]
pub enum NodeCreationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("transaction error: {0}")]
    UnitOfWork(#[from] UnitOfWorkError),

    #[error("graph creation lock: {0}")]
    Lock(#[from] LockError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("events not durably recorded: {0}")]
    Unrecorded(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} was not set by an earlier step")]
    MissingState(&'static str),
}

/// Tunables of the node-creation saga.
#[derive(Debug, Clone)]
pub struct NodeCreationSettings {
    pub discovery_retry: RetryPolicy,
    pub publish_retry: RetryPolicy,
    pub lock: LockOptions,
    /// Attempts at the version-checked graph counter update.
    pub metadata_attempts: u32,
}

impl Default for NodeCreationSettings {
    fn default() -> Self {
        Self {
            discovery_retry: RetryPolicy::new(2, Duration::from_secs(2)),
            publish_retry: RetryPolicy::new(2, Duration::from_secs(1)),
            lock: LockOptions::default(),
            metadata_attempts: 3,
        }
    }
}

/// State shared by the steps of one run.
pub struct NodeCreationData<S: ItemStore + Clone + 'static> {
    request: CreateNodeRequest,
    uow: UnitOfWork<S>,
    graph: Option<Graph>,
    graph_created: bool,
    lock: Option<DistributedLock<S>>,
    node: Option<Node>,
    candidates: Vec<EdgeCandidate>,
    edges: Vec<Edge>,
    event_ids: Vec<EventId>,
    committed: bool,
}

impl<S: ItemStore + Clone + 'static> std::fmt::Debug for NodeCreationData<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCreationData")
            .field("request", &self.request)
            .field("uow", &self.uow)
            .field("graph", &self.graph.as_ref().map(|g| g.id))
            .field("graph_created", &self.graph_created)
            .field("lock", &self.lock)
            .field("node", &self.node.as_ref().map(|n| n.id))
            .field("candidates", &self.candidates.len())
            .field("edges", &self.edges.len())
            .field("committed", &self.committed)
            .finish()
    }
}

impl<S: ItemStore + Clone + 'static> NodeCreationData<S> {
    pub fn new(store: S, request: CreateNodeRequest) -> Self {
        Self {
            request,
            uow: UnitOfWork::new(store),
            graph: None,
            graph_created: false,
            lock: None,
            node: None,
            candidates: Vec::new(),
            edges: Vec::new(),
            event_ids: Vec::new(),
            committed: false,
        }
    }

    pub fn request(&self) -> &CreateNodeRequest {
        &self.request
    }

    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Returns what the run created, or `None` if it never got that far.
    pub fn into_outcome(self) -> Option<NodeCreationOutcome> {
        Some(NodeCreationOutcome {
            node: self.node?,
            graph: self.graph?,
            graph_created: self.graph_created,
            edges: self.edges,
            event_ids: self.event_ids,
        })
    }

    fn require_graph(&self) -> Result<&Graph, NodeCreationError> {
        self.graph
            .as_ref()
            .ok_or(NodeCreationError::MissingState("graph"))
    }

    fn require_node(&self) -> Result<&Node, NodeCreationError> {
        self.node
            .as_ref()
            .ok_or(NodeCreationError::MissingState("node"))
    }
}

type Data<S> = NodeCreationData<S>;
type StepResult = Result<(), NodeCreationError>;

/// Builds the saga over `store`.
///
/// `relay` is woken once the run's events are committed; without one the
/// relay picks them up on its next poll.
pub fn node_creation_saga<S>(
    store: S,
    discovery: Arc<dyn EdgeDiscoveryService>,
    relay: Option<RelayHandle>,
    settings: &NodeCreationSettings,
) -> Saga<NodeCreationData<S>, NodeCreationError>
where
    S: ItemStore + Clone + 'static,
{
    SagaBuilder::<NodeCreationData<S>, NodeCreationError>::new(SAGA_NAME)
        .with_saga_step(Begin)
        .with_saga_step(EnsureGraph {
            store: store.clone(),
            graphs: StoreRepository::new(store.clone()),
            lock_options: settings.lock.clone(),
        })
        .with_saga_step(CreateNode)
        .with_saga_step(SaveNode {
            nodes: StoreRepository::new(store.clone()),
        })
        .with_spec(StepSpec::new(DiscoverEdges { discovery }).with_retry(settings.discovery_retry))
        .with_saga_step(CreateEdges {
            edges: StoreRepository::new(store.clone()),
        })
        .with_saga_step(Commit)
        .with_spec(
            StepSpec::new(PublishEvents {
                store: store.clone(),
                relay,
            })
            .with_retry(settings.publish_retry),
        )
        .with_saga_step(UpdateMetadata {
            graphs: StoreRepository::new(store),
            attempts: settings.metadata_attempts.max(1),
        })
        .build()
}

/// Opens the unit of work.
struct Begin;

#[async_trait]
impl<S: ItemStore + Clone + 'static> SagaStep<Data<S>, NodeCreationError> for Begin {
    fn name(&self) -> &str {
        STEP_BEGIN
    }

    async fn execute(&self, ctx: &Context, data: &mut Data<S>) -> StepResult {
        data.uow.begin(ctx)?;
        Ok(())
    }

    fn is_compensable(&self) -> bool {
        true
    }

    async fn compensate(&self, _ctx: &Context, data: &mut Data<S>) -> StepResult {
        data.uow.rollback().await?;
        Ok(())
    }
}

/// Finds the user's default graph, or registers its creation.
struct EnsureGraph<S: ItemStore + Clone + 'static> {
    store: S,
    graphs: StoreRepository<S, Graph>,
    lock_options: LockOptions,
}

impl<S: ItemStore + Clone + 'static> EnsureGraph<S> {
    async fn default_graph(&self, user_id: &UserId) -> Result<Option<Graph>, NodeCreationError> {
        let pointer = self
            .store
            .get_decoded::<UserGraphPointer>(&UserGraphPointer::key_for(user_id))
            .await?;
        match pointer {
            Some((pointer, _)) => Ok(Some(self.graphs.require(pointer.graph_id).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<S: ItemStore + Clone + 'static> SagaStep<Data<S>, NodeCreationError> for EnsureGraph<S> {
    fn name(&self) -> &str {
        STEP_ENSURE_GRAPH
    }

    async fn execute(&self, ctx: &Context, data: &mut Data<S>) -> StepResult {
        let user_id = UserId::new(data.request.user_id.as_str())?;
        if let Some(graph) = self.default_graph(&user_id).await? {
            data.graph = Some(graph);
            return Ok(());
        }

        let owner = ctx
            .operation_id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| EntityId::new().to_string());
        let lock = DistributedLock::try_acquire(
            self.store.clone(),
            ctx,
            &graph_creation_resource(&user_id),
            &owner,
            &self.lock_options,
        )
        .await?;

        // Another worker may have created the graph while we waited
        if let Some(graph) = self.default_graph(&user_id).await? {
            if let Err(e) = lock.release().await {
                tracing::warn!(error = %e, "failed to release unused graph lock");
            }
            data.graph = Some(graph);
            return Ok(());
        }

        let graph = Graph::new(user_id.clone(), DEFAULT_GRAPH_NAME);
        let pointer = UserGraphPointer::new(user_id, graph.id);
        self.graphs.register_save(&mut data.uow, &graph)?;
        data.uow.register_write(pointer.to_create_write()?)?;
        data.uow.register_event(&GraphEvent::graph_created(&graph))?;

        let held = lock.clone();
        data.uow.register_rollback("release graph creation lock", move || async move {
            held.release()
                .await
                .map_err(|e| Box::new(e) as RollbackError)
        })?;

        tracing::info!(graph_id = %graph.id, "default graph registered for creation");
        data.lock = Some(lock);
        data.graph = Some(graph);
        data.graph_created = true;
        Ok(())
    }

    fn is_compensable(&self) -> bool {
        true
    }

    async fn compensate(&self, _ctx: &Context, data: &mut Data<S>) -> StepResult {
        if let Some(lock) = &data.lock {
            lock.release().await?;
        }
        Ok(())
    }
}

/// Builds and validates the node.
struct CreateNode;

#[async_trait]
impl<S: ItemStore + Clone + 'static> SagaStep<Data<S>, NodeCreationError> for CreateNode {
    fn name(&self) -> &str {
        STEP_CREATE_NODE
    }

    async fn execute(&self, _ctx: &Context, data: &mut Data<S>) -> StepResult {
        let graph = data.require_graph()?;
        let request = &data.request;
        let keywords = if request.keywords.is_empty() {
            extract_keywords(&request.content, MAX_KEYWORDS)
        } else {
            request.keywords.clone()
        };
        let node = Node::new(graph.id, graph.owner.clone(), &request.content, keywords)?;
        data.node = Some(node);
        Ok(())
    }
}

/// Registers the node and its creation event.
struct SaveNode<S: ItemStore + Clone + 'static> {
    nodes: StoreRepository<S, Node>,
}

#[async_trait]
impl<S: ItemStore + Clone + 'static> SagaStep<Data<S>, NodeCreationError> for SaveNode<S> {
    fn name(&self) -> &str {
        STEP_SAVE_NODE
    }

    async fn execute(&self, _ctx: &Context, data: &mut Data<S>) -> StepResult {
        let node = data
            .node
            .as_ref()
            .ok_or(NodeCreationError::MissingState("node"))?;
        self.nodes.register_save(&mut data.uow, node)?;
        data.uow.register_event(&GraphEvent::node_created(node))?;
        Ok(())
    }

    fn is_compensable(&self) -> bool {
        true
    }

    /// Before the commit the rolled-back unit of work discards the node.
    /// After it, the node is deleted in a transaction of its own.
    async fn compensate(&self, ctx: &Context, data: &mut Data<S>) -> StepResult {
        if !data.committed {
            return Ok(());
        }
        let node = data.require_node()?;
        let mut uow = UnitOfWork::new(self.nodes.store().clone());
        uow.begin(ctx)?;
        self.nodes.register_delete(&mut uow, node.id)?;
        uow.register_event(&GraphEvent::node_deleted(node))?;
        uow.commit(ctx).await?;
        tracing::info!(node_id = %node.id, "committed node deleted");
        Ok(())
    }
}

/// Asks the discovery service for related nodes.
struct DiscoverEdges {
    discovery: Arc<dyn EdgeDiscoveryService>,
}

#[async_trait]
impl<S: ItemStore + Clone + 'static> SagaStep<Data<S>, NodeCreationError> for DiscoverEdges {
    fn name(&self) -> &str {
        STEP_DISCOVER_EDGES
    }

    async fn execute(&self, ctx: &Context, data: &mut Data<S>) -> StepResult {
        let candidates = self.discovery.discover(ctx, data.require_node()?).await?;
        data.candidates = candidates;
        Ok(())
    }
}

/// Registers one edge per discovered candidate.
struct CreateEdges<S: ItemStore + Clone + 'static> {
    edges: StoreRepository<S, Edge>,
}

#[async_trait]
impl<S: ItemStore + Clone + 'static> SagaStep<Data<S>, NodeCreationError> for CreateEdges<S> {
    fn name(&self) -> &str {
        STEP_CREATE_EDGES
    }

    async fn execute(&self, _ctx: &Context, data: &mut Data<S>) -> StepResult {
        let node = data
            .node
            .as_ref()
            .ok_or(NodeCreationError::MissingState("node"))?;
        let mut edges = Vec::with_capacity(data.candidates.len());
        for candidate in &data.candidates {
            let edge = Edge::new(node.graph_id, node.id, candidate.target, candidate.weight)?;
            self.edges.register_save(&mut data.uow, &edge)?;
            data.uow.register_event(&GraphEvent::edge_created(&edge))?;
            edges.push(edge);
        }
        data.edges = edges;
        Ok(())
    }

    fn is_compensable(&self) -> bool {
        true
    }

    async fn compensate(&self, ctx: &Context, data: &mut Data<S>) -> StepResult {
        if !data.committed || data.edges.is_empty() {
            return Ok(());
        }
        let mut uow = UnitOfWork::new(self.edges.store().clone());
        uow.begin(ctx)?;
        for edge in &data.edges {
            self.edges.register_delete(&mut uow, edge.id)?;
            uow.register_event(&GraphEvent::edge_deleted(edge))?;
        }
        uow.commit(ctx).await?;
        tracing::info!(edges = data.edges.len(), "committed edges deleted");
        Ok(())
    }
}

/// Commits the unit of work and releases the graph lock, if held.
struct Commit;

#[async_trait]
impl<S: ItemStore + Clone + 'static> SagaStep<Data<S>, NodeCreationError> for Commit {
    fn name(&self) -> &str {
        STEP_COMMIT
    }

    async fn execute(&self, ctx: &Context, data: &mut Data<S>) -> StepResult {
        let receipt = data.uow.commit(ctx).await?;
        data.event_ids = receipt.event_ids;
        data.committed = true;
        tracing::info!(items = receipt.items_written, "node creation committed");

        if let Some(lock) = &data.lock {
            if let Err(e) = lock.release().await {
                tracing::warn!(error = %e, "failed to release graph lock after commit");
            }
        }
        Ok(())
    }
}

/// Confirms the committed events were recorded in the outbox and wakes the
/// relay.
/// Delivery itself is the relay's job.
struct PublishEvents<S: ItemStore + Clone + 'static> {
    store: S,
    relay: Option<RelayHandle>,
}

#[async_trait]
impl<S: ItemStore + Clone + 'static> SagaStep<Data<S>, NodeCreationError> for PublishEvents<S> {
    fn name(&self) -> &str {
        STEP_PUBLISH_EVENTS
    }

    async fn execute(&self, _ctx: &Context, data: &mut Data<S>) -> StepResult {
        for event_id in &data.event_ids {
            // A running relay may already have delivered and archived it
            let item = match self.store.get(&OutboxRecord::key_for(*event_id)).await? {
                Some(item) => Some(item),
                None => {
                    self.store
                        .get(&OutboxRecord::published_key_for(*event_id))
                        .await?
                }
            };
            let item = item.ok_or_else(|| {
                NodeCreationError::Unrecorded(format!("no outbox record for event {event_id}"))
            })?;
            let record = OutboxRecord::from_item(&item)?;
            tracing::trace!(%event_id, status = ?record.status, "outbox record confirmed");
        }

        if let Some(relay) = &self.relay {
            relay.wake();
        }
        Ok(())
    }
}

/// Adds the new node and edges to the graph's counters.
struct UpdateMetadata<S: ItemStore + Clone + 'static> {
    graphs: StoreRepository<S, Graph>,
    attempts: u32,
}

#[async_trait]
impl<S: ItemStore + Clone + 'static> SagaStep<Data<S>, NodeCreationError> for UpdateMetadata<S> {
    fn name(&self) -> &str {
        STEP_UPDATE_METADATA
    }

    async fn execute(&self, _ctx: &Context, data: &mut Data<S>) -> StepResult {
        let graph_id = data.require_graph()?.id;
        let added_edges = data.edges.len() as u64;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut graph = self.graphs.require(graph_id).await?;
            graph.record_additions(1, added_edges);
            match self.graphs.save(&graph).await {
                Ok(version) => {
                    graph.set_version(version);
                    data.graph = Some(graph);
                    return Ok(());
                }
                Err(DomainError::Conflict { .. }) if attempt < self.attempts => {
                    tracing::debug!(attempt, "graph changed concurrently, reloading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryEdgeDiscovery;
    use store::InMemoryStore;

    fn fast_settings() -> NodeCreationSettings {
        NodeCreationSettings {
            discovery_retry: RetryPolicy::new(2, Duration::from_millis(1)),
            publish_retry: RetryPolicy::new(2, Duration::from_millis(1)),
            lock: LockOptions {
                ttl: Duration::from_secs(30),
                acquire_timeout: Duration::from_millis(50),
                retry_interval: Duration::from_millis(5),
            },
            metadata_attempts: 3,
        }
    }

    fn saga_over(
        store: &InMemoryStore,
        discovery: InMemoryEdgeDiscovery<InMemoryStore>,
    ) -> Saga<NodeCreationData<InMemoryStore>, NodeCreationError> {
        node_creation_saga(store.clone(), Arc::new(discovery), None, &fast_settings())
    }

    #[test]
    fn steps_are_declared_in_order() {
        let store = InMemoryStore::new();
        let saga = saga_over(&store, InMemoryEdgeDiscovery::new(store.clone()));
        assert_eq!(
            saga.step_names(),
            vec![
                STEP_BEGIN,
                STEP_ENSURE_GRAPH,
                STEP_CREATE_NODE,
                STEP_SAVE_NODE,
                STEP_DISCOVER_EDGES,
                STEP_CREATE_EDGES,
                STEP_COMMIT,
                STEP_PUBLISH_EVENTS,
                STEP_UPDATE_METADATA,
            ]
        );
    }

    #[tokio::test]
    async fn first_node_creates_default_graph() {
        let store = InMemoryStore::new();
        let saga = saga_over(&store, InMemoryEdgeDiscovery::new(store.clone()));
        let request = CreateNodeRequest::new("erin", "Ownership and borrowing in Rust");

        let data = saga
            .execute(&Context::new(), NodeCreationData::new(store.clone(), request))
            .await
            .unwrap();
        assert!(data.is_committed());
        let outcome = data.into_outcome().unwrap();

        assert!(outcome.graph_created);
        assert_eq!(outcome.graph.node_count, 1);
        assert_eq!(outcome.graph.edge_count, 0);
        assert!(outcome.edges.is_empty());
        // GraphCreated + NodeCreated
        assert_eq!(outcome.event_ids.len(), 2);
        assert!(!outcome.node.keywords.is_empty());

        let user = UserId::new("erin").unwrap();
        let pointer = store
            .get_decoded::<UserGraphPointer>(&UserGraphPointer::key_for(&user))
            .await
            .unwrap()
            .unwrap()
            .0;
        assert_eq!(pointer.graph_id, outcome.graph.id);
        // The graph lock was released after commit
        assert!(
            store
                .get(&store::lock_key(&graph_creation_resource(&user)))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn second_node_reuses_graph_and_links_related_nodes() {
        let store = InMemoryStore::new();
        let saga = saga_over(&store, InMemoryEdgeDiscovery::new(store.clone()));
        let ctx = Context::new();

        let first = saga
            .execute(
                &ctx,
                NodeCreationData::new(
                    store.clone(),
                    CreateNodeRequest::new("erin", "first").with_keywords(["rust", "async"]),
                ),
            )
            .await
            .unwrap()
            .into_outcome()
            .unwrap();

        let second = saga
            .execute(
                &ctx,
                NodeCreationData::new(
                    store.clone(),
                    CreateNodeRequest::new("erin", "second").with_keywords(["rust"]),
                ),
            )
            .await
            .unwrap()
            .into_outcome()
            .unwrap();

        assert!(!second.graph_created);
        assert_eq!(second.graph.id, first.graph.id);
        assert_eq!(second.edges.len(), 1);
        assert_eq!(second.edges[0].source, second.node.id);
        assert_eq!(second.edges[0].target, first.node.id);
        assert_eq!(second.graph.node_count, 2);
        assert_eq!(second.graph.edge_count, 1);
    }

    #[tokio::test]
    async fn invalid_content_releases_lock_and_writes_nothing() {
        let store = InMemoryStore::new();
        let saga = saga_over(&store, InMemoryEdgeDiscovery::new(store.clone()));

        let (result, report) = saga
            .execute_with_report(
                &Context::new(),
                NodeCreationData::new(store.clone(), CreateNodeRequest::new("erin", "   ")),
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.step(), STEP_CREATE_NODE);
        assert!(matches!(
            err.step_error(),
            Some(NodeCreationError::Domain(DomainError::Validation(_)))
        ));
        assert_eq!(report.compensated_steps(), [STEP_ENSURE_GRAPH, STEP_BEGIN]);
        assert_eq!(store.item_count().await, 0);
    }

    #[tokio::test]
    async fn blank_user_is_rejected() {
        let store = InMemoryStore::new();
        let saga = saga_over(&store, InMemoryEdgeDiscovery::new(store.clone()));
        let err = saga
            .execute(
                &Context::new(),
                NodeCreationData::new(store.clone(), CreateNodeRequest::new(" ", "content")),
            )
            .await
            .unwrap_err();
        assert_eq!(err.step(), STEP_ENSURE_GRAPH);
    }

    #[tokio::test]
    async fn flaky_discovery_is_retried() {
        let store = InMemoryStore::new();
        let discovery = InMemoryEdgeDiscovery::new(store.clone());
        discovery.fail_next(2);
        let saga = saga_over(&store, discovery);

        let (result, report) = saga
            .execute_with_report(
                &Context::new(),
                NodeCreationData::new(store.clone(), CreateNodeRequest::new("erin", "graphs")),
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(report.attempts(STEP_DISCOVER_EDGES), 3);
    }

    #[tokio::test]
    async fn failure_after_commit_deletes_committed_node() {
        let store = InMemoryStore::new();
        let saga = SagaBuilder::<NodeCreationData<InMemoryStore>, NodeCreationError>::new("tail")
            .with_saga_step(Begin)
            .with_saga_step(EnsureGraph {
                store: store.clone(),
                graphs: StoreRepository::new(store.clone()),
                lock_options: fast_settings().lock,
            })
            .with_saga_step(CreateNode)
            .with_saga_step(SaveNode {
                nodes: StoreRepository::new(store.clone()),
            })
            .with_saga_step(Commit)
            .with_step("explode", |_ctx, _data| {
                Box::pin(async { Err(NodeCreationError::Unrecorded("outbox offline".to_string())) })
            })
            .build();

        let (result, report) = saga
            .execute_with_report(
                &Context::new(),
                NodeCreationData::new(store.clone(), CreateNodeRequest::new("erin", "doomed")),
            )
            .await;
        assert!(result.is_err());
        assert!(report.compensation_errors().is_empty());

        let nodes: StoreRepository<_, Node> = StoreRepository::new(store.clone());
        assert!(nodes.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_after_commit_records_edge_deletions() {
        let store = InMemoryStore::new();
        let ctx = Context::new();
        saga_over(&store, InMemoryEdgeDiscovery::new(store.clone()))
            .execute(
                &ctx,
                NodeCreationData::new(
                    store.clone(),
                    CreateNodeRequest::new("erin", "first").with_keywords(["rust"]),
                ),
            )
            .await
            .unwrap();

        let saga = SagaBuilder::<NodeCreationData<InMemoryStore>, NodeCreationError>::new("tail")
            .with_saga_step(Begin)
            .with_saga_step(EnsureGraph {
                store: store.clone(),
                graphs: StoreRepository::new(store.clone()),
                lock_options: fast_settings().lock,
            })
            .with_saga_step(CreateNode)
            .with_saga_step(SaveNode {
                nodes: StoreRepository::new(store.clone()),
            })
            .with_saga_step(DiscoverEdges {
                discovery: Arc::new(InMemoryEdgeDiscovery::new(store.clone())),
            })
            .with_saga_step(CreateEdges {
                edges: StoreRepository::new(store.clone()),
            })
            .with_saga_step(Commit)
            .with_step("explode", |_ctx, _data| {
                Box::pin(async { Err(NodeCreationError::Unrecorded("outbox offline".to_string())) })
            })
            .build();

        let (result, report) = saga
            .execute_with_report(
                &ctx,
                NodeCreationData::new(
                    store.clone(),
                    CreateNodeRequest::new("erin", "second").with_keywords(["rust"]),
                ),
            )
            .await;
        assert!(result.is_err());
        assert!(report.compensation_errors().is_empty());
        assert_eq!(
            report.compensated_steps(),
            [STEP_CREATE_EDGES, STEP_SAVE_NODE, STEP_ENSURE_GRAPH, STEP_BEGIN]
        );

        let edges: StoreRepository<_, Edge> = StoreRepository::new(store.clone());
        assert!(edges.list().await.unwrap().is_empty());

        let types: Vec<String> = store
            .query_prefix(store::OUTBOX_PREFIX)
            .await
            .unwrap()
            .iter()
            .map(|item| OutboxRecord::from_item(item).unwrap().event.event_type)
            .collect();
        let count = |t: &str| types.iter().filter(|x| *x == t).count();
        assert_eq!(count("EdgeCreated"), 1);
        assert_eq!(count("EdgeDeleted"), 1);
        assert_eq!(count("NodeCreated"), 2);
        assert_eq!(count("NodeDeleted"), 1);
    }
}
