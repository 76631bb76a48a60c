//! Ambient request context passed into every saga step, unit of work and
//! lock acquisition.

use tokio_util::sync::CancellationToken;

use crate::OperationId;

/// Cancellation signal plus the operation the current work belongs to.
///
/// Cloning a context shares its cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    operation_id: Option<OperationId>,
}

impl Context {
    /// Creates a root context that is never cancelled unless [`Context::cancel`]
    /// is called on it or a clone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a root context tagged with an operation ID.
    pub fn for_operation(operation_id: OperationId) -> Self {
        Self {
            token: CancellationToken::new(),
            operation_id: Some(operation_id),
        }
    }

    /// Creates a context driven by an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            operation_id: None,
        }
    }

    /// Returns the operation ID, if any.
    pub fn operation_id(&self) -> Option<OperationId> {
        self.operation_id
    }

    /// Returns a context that is cancelled when this one is, but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            operation_id: self.operation_id,
        }
    }

    /// Returns a context with the same operation ID and a fresh, uncancelled
    /// signal. Compensation runs under this.
    pub fn detached(&self) -> Self {
        Self {
            token: CancellationToken::new(),
            operation_id: self.operation_id,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation() {
        let ctx = Context::new();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn child_follows_parent_but_not_the_reverse() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());

        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn detached_keeps_operation_and_drops_cancellation() {
        let op = OperationId::new();
        let ctx = Context::for_operation(op);
        ctx.cancel();

        let detached = ctx.detached();
        assert!(!detached.is_cancelled());
        assert_eq!(detached.operation_id(), Some(op));
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let ctx = Context::new();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        ctx.cancel();
        handle.await.unwrap();
    }
}
