//! Fluent construction of sagas.

use std::time::Duration;

use common::Context;
use futures_util::future::BoxFuture;

use crate::executor::Saga;
use crate::retry::RetryPolicy;
use crate::step::{FnStep, SagaStep, StepSpec};

/// Builds a [`Saga`] one step at a time. Steps run in the order they are
/// added.
///
/// ```ignore
/// let saga = SagaBuilder::<Vec<&str>, MyError>::new("example")
///     .with_step("validate", |_ctx, data| Box::pin(async move { Ok(()) }))
///     .with_compensable_step(
///         "reserve",
///         |_ctx, data| Box::pin(async move { data.push("reserved"); Ok(()) }),
///         |_ctx, data| Box::pin(async move { data.pop(); Ok(()) }),
///     )
///     .with_retryable_step("notify", notify, 2, Duration::from_secs(1))
///     .build();
/// ```
pub struct SagaBuilder<D, E> {
    name: String,
    steps: Vec<StepSpec<D, E>>,
}

impl<D, E> SagaBuilder<D, E>
where
    D: Send + 'static,
    E: Send + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Adds a step with no compensation. If it fails, only the steps before
    /// it are unwound.
    pub fn with_step<F>(self, name: impl Into<String>, execute: F) -> Self
    where
        F: for<'a> Fn(&'a Context, &'a mut D) -> BoxFuture<'a, Result<(), E>>
            + Send
            + Sync
            + 'static,
    {
        self.with_spec(StepSpec::new(FnStep::new(name, execute)))
    }

    /// Adds a step whose `compensate` is pushed on the compensation stack
    /// once it succeeds.
    pub fn with_compensable_step<F, C>(self, name: impl Into<String>, execute: F, compensate: C) -> Self
    where
        F: for<'a> Fn(&'a Context, &'a mut D) -> BoxFuture<'a, Result<(), E>>
            + Send
            + Sync
            + 'static,
        C: for<'a> Fn(&'a Context, &'a mut D) -> BoxFuture<'a, Result<(), E>>
            + Send
            + Sync
            + 'static,
    {
        self.with_spec(StepSpec::new(
            FnStep::new(name, execute).with_compensation(compensate),
        ))
    }

    /// Adds a step that is run up to `max_retries` more times, `delay`
    /// apart, before its failure counts.
    pub fn with_retryable_step<F>(
        self,
        name: impl Into<String>,
        execute: F,
        max_retries: u32,
        delay: Duration,
    ) -> Self
    where
        F: for<'a> Fn(&'a Context, &'a mut D) -> BoxFuture<'a, Result<(), E>>
            + Send
            + Sync
            + 'static,
    {
        self.with_spec(
            StepSpec::new(FnStep::new(name, execute))
                .with_retry(RetryPolicy::new(max_retries, delay)),
        )
    }

    /// Adds a [`SagaStep`] implementation without retries.
    pub fn with_saga_step(self, step: impl SagaStep<D, E> + 'static) -> Self {
        self.with_spec(StepSpec::new(step))
    }

    /// Adds a step with its policies spelled out.
    pub fn with_spec(mut self, spec: StepSpec<D, E>) -> Self {
        self.steps.push(spec);
        self
    }

    pub fn build(self) -> Saga<D, E> {
        Saga::from_steps(self.name, self.steps)
    }
}
