//! Saga steps: the trait, a closure adapter and the per-step policy.

use async_trait::async_trait;
use common::Context;
use futures_util::future::BoxFuture;

use crate::retry::RetryPolicy;

/// One step of a saga over shared data `D`, failing with `E`.
///
/// Steps mutate `D` in place; whatever a later step or a compensation
/// needs to know is left there by the steps before it.
#[async_trait]
pub trait SagaStep<D, E>: Send + Sync
where
    D: Send + 'static,
    E: Send + 'static,
{
    /// Name used in errors, logs and the run's journal.
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &Context, data: &mut D) -> Result<(), E>;

    /// Returns true if [`compensate`](SagaStep::compensate) undoes this
    /// step. Only compensable steps are pushed on the compensation stack.
    fn is_compensable(&self) -> bool {
        false
    }

    /// Undoes a successful [`execute`](SagaStep::execute).
    ///
    /// Runs under a context that is never cancelled, so the unwind
    /// completes even if the run itself was cancelled.
    async fn compensate(&self, _ctx: &Context, _data: &mut D) -> Result<(), E> {
        Ok(())
    }
}

/// Signature of a closure usable as a step body or compensation.
///
/// ```ignore
/// |ctx, data| Box::pin(async move { data.push(1); Ok(()) })
/// ```
pub type StepFn<D, E> =
    Box<dyn for<'a> Fn(&'a Context, &'a mut D) -> BoxFuture<'a, Result<(), E>> + Send + Sync>;

/// A step built from closures.
pub struct FnStep<D, E> {
    name: String,
    execute: StepFn<D, E>,
    compensate: Option<StepFn<D, E>>,
}

impl<D, E> FnStep<D, E> {
    pub fn new<F>(name: impl Into<String>, execute: F) -> Self
    where
        F: for<'a> Fn(&'a Context, &'a mut D) -> BoxFuture<'a, Result<(), E>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            execute: Box::new(execute),
            compensate: None,
        }
    }

    /// Makes the step compensable.
    pub fn with_compensation<F>(mut self, compensate: F) -> Self
    where
        F: for<'a> Fn(&'a Context, &'a mut D) -> BoxFuture<'a, Result<(), E>>
            + Send
            + Sync
            + 'static,
    {
        self.compensate = Some(Box::new(compensate));
        self
    }
}

#[async_trait]
impl<D, E> SagaStep<D, E> for FnStep<D, E>
where
    D: Send + 'static,
    E: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &Context, data: &mut D) -> Result<(), E> {
        (self.execute)(ctx, data).await
    }

    fn is_compensable(&self) -> bool {
        self.compensate.is_some()
    }

    async fn compensate(&self, ctx: &Context, data: &mut D) -> Result<(), E> {
        match &self.compensate {
            Some(compensate) => compensate(ctx, data).await,
            None => Ok(()),
        }
    }
}

/// A step together with its retry policy.
pub struct StepSpec<D, E> {
    step: Box<dyn SagaStep<D, E>>,
    retry: Option<RetryPolicy>,
}

impl<D, E> StepSpec<D, E>
where
    D: Send + 'static,
    E: Send + 'static,
{
    pub fn new(step: impl SagaStep<D, E> + 'static) -> Self {
        Self {
            step: Box::new(step),
            retry: None,
        }
    }

    /// Retries the step on failure.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn name(&self) -> &str {
        self.step.name()
    }

    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry
    }

    pub fn is_compensable(&self) -> bool {
        self.step.is_compensable()
    }

    pub(crate) fn step(&self) -> &dyn SagaStep<D, E> {
        self.step.as_ref()
    }
}
