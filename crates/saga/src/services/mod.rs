//! External collaborators of the node-creation saga.

pub mod discovery;

pub use discovery::{DiscoveryError, EdgeCandidate, EdgeDiscoveryService, InMemoryEdgeDiscovery};
