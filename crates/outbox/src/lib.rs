//! Outbox relay for the knowledge-graph service.
//!
//! Units of work record events as pending outbox items in the same atomic
//! batch as the state change. This crate provides the separate process that
//! delivers them:
//! - [`EventPublisher`] port for the message transport
//! - [`OutboxRelay`] draining pending records, woken via [`RelayHandle`]

pub mod error;
pub mod publisher;
pub mod relay;

pub use error::{OutboxError, Result};
pub use publisher::{EventPublisher, InMemoryEventPublisher, LogEventPublisher};
pub use relay::{DrainReport, OutboxRelay, RelayHandle};
