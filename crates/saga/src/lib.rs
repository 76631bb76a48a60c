//! Saga orchestration for the knowledge-graph service.
//!
//! A [`Saga`] runs its steps in order over shared data. When a step fails,
//! the compensations of the steps that already succeeded run in reverse.
//! Steps can be retried with a fixed delay before their failure counts.
//!
//! On top of the engine this crate provides:
//! - the node-creation saga and its [`NodeCreationCoordinator`]
//! - the [`OperationStatusTracker`] behind asynchronous submissions
//! - the edge discovery service the saga consults

pub mod builder;
pub mod compensation;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod executor;
pub mod node_creation;
pub mod report;
pub mod retry;
pub mod services;
pub mod state;
pub mod step;
pub mod tracker;

pub use builder::SagaBuilder;
pub use compensation::CompensationStack;
pub use coordinator::{NodeCreationCoordinator, OPERATION_KIND};
pub use error::{CompensationError, SagaError};
pub use events::SagaEvent;
pub use executor::Saga;
pub use node_creation::{
    CreateNodeRequest, NodeCreationData, NodeCreationError, NodeCreationOutcome,
    NodeCreationSettings, node_creation_saga,
};
pub use report::SagaReport;
pub use retry::RetryPolicy;
pub use services::{DiscoveryError, EdgeCandidate, EdgeDiscoveryService, InMemoryEdgeDiscovery};
pub use state::SagaState;
pub use step::{FnStep, SagaStep, StepFn, StepSpec};
pub use tracker::{
    CleanupTask, OperationRecord, OperationStatus, OperationStatusTracker, StoreOperationTracker,
    TrackerError, spawn_cleanup,
};
