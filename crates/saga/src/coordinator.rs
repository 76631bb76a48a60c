//! Runs node-creation sagas, directly or in the background with their
//! status kept in an [`OperationStatusTracker`].

use std::sync::Arc;
use std::time::Instant;

use common::{Context, OperationId};
use outbox::RelayHandle;
use store::ItemStore;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::error::SagaError;
use crate::executor::Saga;
use crate::node_creation::{
    self, CreateNodeRequest, NodeCreationData, NodeCreationError, NodeCreationOutcome,
    NodeCreationSettings, STEP_UPDATE_METADATA,
};
use crate::services::EdgeDiscoveryService;
use crate::tracker::{OperationRecord, OperationStatusTracker, TrackerError};

/// Operation kind recorded for submitted node creations.
pub const OPERATION_KIND: &str = "node_creation";

/// Entry point for creating nodes.
///
/// Cloning is cheap; clones share the saga, the tracker and the set of
/// background runs.
pub struct NodeCreationCoordinator<S, T>
where
    S: ItemStore + Clone + 'static,
    T: OperationStatusTracker + ?Sized + 'static,
{
    store: S,
    saga: Arc<Saga<NodeCreationData<S>, NodeCreationError>>,
    tracker: Arc<T>,
    tasks: TaskTracker,
}

impl<S, T> Clone for NodeCreationCoordinator<S, T>
where
    S: ItemStore + Clone + 'static,
    T: OperationStatusTracker + ?Sized + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            saga: Arc::clone(&self.saga),
            tracker: Arc::clone(&self.tracker),
            tasks: self.tasks.clone(),
        }
    }
}

impl<S, T> NodeCreationCoordinator<S, T>
where
    S: ItemStore + Clone + 'static,
    T: OperationStatusTracker + ?Sized + 'static,
{
    pub fn new(
        store: S,
        tracker: Arc<T>,
        discovery: Arc<dyn EdgeDiscoveryService>,
        relay: Option<RelayHandle>,
        settings: &NodeCreationSettings,
    ) -> Self {
        let saga = node_creation::node_creation_saga(store.clone(), discovery, relay, settings);
        Self {
            store,
            saga: Arc::new(saga),
            tracker,
            tasks: TaskTracker::new(),
        }
    }

    pub fn tracker(&self) -> &Arc<T> {
        &self.tracker
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs the saga to completion.
    #[tracing::instrument(skip(self, ctx, request), fields(user_id = %request.user_id))]
    pub async fn create_node(
        &self,
        ctx: &Context,
        request: CreateNodeRequest,
    ) -> Result<NodeCreationOutcome, SagaError<NodeCreationError>> {
        metrics::counter!("saga_executions_total").increment(1);
        let started = Instant::now();

        let data = NodeCreationData::new(self.store.clone(), request);
        let (result, report) = self.saga.execute_with_report(ctx, data).await;
        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());

        for failure in report.compensation_errors() {
            tracing::error!(
                step = %failure.step,
                error = %failure.message,
                "compensation left state behind"
            );
        }

        match result {
            Ok(data) => {
                let outcome = data.into_outcome().ok_or_else(|| SagaError::StepFailed {
                    step: STEP_UPDATE_METADATA.to_string(),
                    source: NodeCreationError::MissingState("node"),
                })?;
                metrics::counter!("saga_completed").increment(1);
                tracing::info!(
                    node_id = %outcome.node.id,
                    graph_id = %outcome.graph.id,
                    edges = outcome.edges.len(),
                    "node created"
                );
                Ok(outcome)
            }
            Err(e) => {
                metrics::counter!("saga_failed").increment(1);
                tracing::warn!(error = %e, state = %report.state(), "node creation failed");
                Err(e)
            }
        }
    }

    /// Records a pending operation and runs the saga in the background.
    ///
    /// Returns as soon as the pending record is stored; poll
    /// [`status`](Self::status) with the returned ID for the outcome.
    pub async fn submit(&self, request: CreateNodeRequest) -> Result<OperationId, TrackerError> {
        let operation_id = OperationId::new();
        self.tracker
            .store(OperationRecord::pending(operation_id, OPERATION_KIND))
            .await?;

        let this = self.clone();
        let span = tracing::info_span!("node_creation_operation", %operation_id);
        self.tasks.spawn(
            async move {
                let ctx = Context::for_operation(operation_id);
                let result = this.create_node(&ctx, request).await;
                this.record_outcome(operation_id, result).await;
            }
            .instrument(span),
        );
        tracing::debug!(%operation_id, "node creation submitted");
        Ok(operation_id)
    }

    async fn record_outcome(
        &self,
        operation_id: OperationId,
        result: Result<NodeCreationOutcome, SagaError<NodeCreationError>>,
    ) {
        let mut record = match self.tracker.get(operation_id).await {
            Ok(Some(record)) => record,
            Ok(None) => OperationRecord::pending(operation_id, OPERATION_KIND),
            Err(e) => {
                tracing::error!(error = %e, "failed to load operation record");
                return;
            }
        };

        match result.map(|outcome| serde_json::to_value(&outcome)) {
            Ok(Ok(value)) => record.complete(value),
            Ok(Err(e)) => record.fail(format!("failed to encode result: {e}")),
            Err(e) => record.fail(e.to_string()),
        }

        // The record may have been cleaned up while the saga ran
        let stored = match self.tracker.update(record.clone()).await {
            Err(TrackerError::NotFound(_)) => self.tracker.store(record).await,
            other => other,
        };
        if let Err(e) = stored {
            tracing::error!(error = %e, "failed to record operation outcome");
        }
    }

    pub async fn status(&self, operation_id: OperationId) -> Result<Option<OperationRecord>, TrackerError> {
        self.tracker.get(operation_id).await
    }

    /// Number of submitted operations still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Stops accepting background work and waits for running sagas.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("node creation coordinator drained");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::retry::RetryPolicy;
    use crate::services::InMemoryEdgeDiscovery;
    use crate::tracker::{OperationStatus, StoreOperationTracker};
    use store::{InMemoryStore, LockOptions};

    type TestCoordinator =
        NodeCreationCoordinator<InMemoryStore, StoreOperationTracker<InMemoryStore>>;

    fn coordinator(store: &InMemoryStore, discovery: InMemoryEdgeDiscovery<InMemoryStore>) -> TestCoordinator {
        let settings = NodeCreationSettings {
            discovery_retry: RetryPolicy::new(1, Duration::from_millis(1)),
            publish_retry: RetryPolicy::new(1, Duration::from_millis(1)),
            lock: LockOptions {
                ttl: Duration::from_secs(30),
                acquire_timeout: Duration::from_millis(200),
                retry_interval: Duration::from_millis(5),
            },
            metadata_attempts: 3,
        };
        NodeCreationCoordinator::new(
            store.clone(),
            Arc::new(StoreOperationTracker::new(store.clone(), Duration::from_secs(3600))),
            Arc::new(discovery),
            None,
            &settings,
        )
    }

    #[tokio::test]
    async fn create_node_returns_outcome() {
        let store = InMemoryStore::new();
        let coordinator = coordinator(&store, InMemoryEdgeDiscovery::new(store.clone()));

        let outcome = coordinator
            .create_node(&Context::new(), CreateNodeRequest::new("frank", "hello graph"))
            .await
            .unwrap();
        assert_eq!(outcome.node.content, "hello graph");
        assert!(outcome.graph_created);
    }

    #[tokio::test]
    async fn submitted_operation_completes() {
        let store = InMemoryStore::new();
        let coordinator = coordinator(&store, InMemoryEdgeDiscovery::new(store.clone()));

        let id = coordinator
            .submit(CreateNodeRequest::new("frank", "background work"))
            .await
            .unwrap();
        coordinator.shutdown().await;

        let record = coordinator.status(id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.kind, OPERATION_KIND);
        let result = record.result.unwrap();
        assert_eq!(result["node"]["content"], "background work");
    }

    #[tokio::test]
    async fn submitted_failure_is_recorded() {
        let store = InMemoryStore::new();
        let discovery = InMemoryEdgeDiscovery::new(store.clone());
        discovery.fail_always();
        let coordinator = coordinator(&store, discovery);

        let id = coordinator
            .submit(CreateNodeRequest::new("frank", "never linked"))
            .await
            .unwrap();
        coordinator.shutdown().await;

        let record = coordinator.status(id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Failed);
        assert!(record.error.unwrap().contains("discover_edges"));
    }

    #[tokio::test]
    async fn unknown_operation_has_no_status() {
        let store = InMemoryStore::new();
        let coordinator = coordinator(&store, InMemoryEdgeDiscovery::new(store.clone()));
        assert!(coordinator.status(OperationId::new()).await.unwrap().is_none());
    }
}
