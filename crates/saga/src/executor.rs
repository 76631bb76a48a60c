//! Sequential saga execution with compensation and retry.

use common::Context;

use crate::compensation::CompensationStack;
use crate::error::SagaError;
use crate::events::SagaEvent;
use crate::report::SagaReport;
use crate::step::StepSpec;

/// An ordered list of steps, built with [`SagaBuilder`](crate::SagaBuilder).
///
/// A saga holds no per-run state and can be shared (for example in an
/// `Arc`) and executed many times concurrently.
pub struct Saga<D, E> {
    name: String,
    steps: Vec<StepSpec<D, E>>,
}

impl<D, E> Saga<D, E>
where
    D: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn from_steps(name: String, steps: Vec<StepSpec<D, E>>) -> Self {
        Self { name, steps }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(StepSpec::name).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl<D, E> Saga<D, E>
where
    D: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Runs every step in order and returns the final data.
    ///
    /// On the first failure the completed compensable steps are undone in
    /// reverse order and the failing step's error is returned.
    pub async fn execute(&self, ctx: &Context, data: D) -> Result<D, SagaError<E>> {
        let (result, _report) = self.execute_with_report(ctx, data).await;
        result
    }

    /// Like [`execute`](Saga::execute), also returning the run's journal.
    #[tracing::instrument(skip_all, fields(saga = %self.name, operation_id = ?ctx.operation_id()))]
    pub async fn execute_with_report(
        &self,
        ctx: &Context,
        mut data: D,
    ) -> (Result<D, SagaError<E>>, SagaReport) {
        let mut report = SagaReport::default();
        report.record(SagaEvent::saga_started(&self.name, ctx.operation_id()));
        let mut stack = CompensationStack::new();

        for (index, spec) in self.steps.iter().enumerate() {
            let step = spec.name();
            if ctx.is_cancelled() {
                let error = SagaError::Cancelled {
                    step: step.to_string(),
                    attempts: 0,
                    last_error: None,
                };
                self.unwind(ctx, &mut data, &mut stack, &mut report, &error)
                    .await;
                return (Err(error), report);
            }

            tracing::info!(step, "saga step started");
            report.record(SagaEvent::step_started(step));

            match self.run_step(spec, ctx, &mut data, &mut report).await {
                Ok(attempts) => {
                    tracing::info!(step, attempts, "saga step completed");
                    report.record(SagaEvent::step_completed(step, attempts));
                    if spec.is_compensable() {
                        stack.push(index);
                    }
                }
                Err(error) => {
                    self.unwind(ctx, &mut data, &mut stack, &mut report, &error)
                        .await;
                    return (Err(error), report);
                }
            }
        }

        tracing::info!("saga completed");
        report.record(SagaEvent::saga_completed());
        (Ok(data), report)
    }

    /// Runs one step, retrying it if its policy allows. Returns the number
    /// of attempts it took.
    async fn run_step(
        &self,
        spec: &StepSpec<D, E>,
        ctx: &Context,
        data: &mut D,
        report: &mut SagaReport,
    ) -> Result<u32, SagaError<E>> {
        let step = spec.name();
        let mut attempt = 1;
        loop {
            let error = match spec.step().execute(ctx, data).await {
                Ok(()) => return Ok(attempt),
                Err(error) => error,
            };

            let Some(policy) = spec.retry_policy() else {
                return Err(SagaError::StepFailed {
                    step: step.to_string(),
                    source: error,
                });
            };
            if !policy.allows_retry_after(attempt) {
                return Err(SagaError::RetryExhausted {
                    step: step.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            tracing::warn!(
                step,
                attempt,
                delay_ms = policy.delay.as_millis() as u64,
                error = %error,
                "saga step failed, retrying"
            );
            if !policy.wait(ctx).await {
                tracing::warn!(step, attempt, "cancelled while waiting to retry");
                return Err(SagaError::Cancelled {
                    step: step.to_string(),
                    attempts: attempt,
                    last_error: Some(error),
                });
            }
            metrics::counter!("saga_step_retries_total").increment(1);
            report.record(SagaEvent::step_retried(step, attempt, error.to_string()));
            attempt += 1;
        }
    }

    /// Undoes completed compensable steps, newest first, under a context
    /// that cannot be cancelled. A failing compensation is recorded and the
    /// rest still run.
    async fn unwind(
        &self,
        ctx: &Context,
        data: &mut D,
        stack: &mut CompensationStack,
        report: &mut SagaReport,
        error: &SagaError<E>,
    ) {
        let failed_step = error.step();
        let cause = error
            .step_error()
            .map(ToString::to_string)
            .unwrap_or_else(|| "operation cancelled".to_string());
        tracing::error!(step = failed_step, error = %error, "saga step failed");
        report.record(SagaEvent::step_failed(failed_step, cause));

        if stack.is_empty() {
            report.record(SagaEvent::saga_failed(error.to_string(), false));
            return;
        }

        tracing::warn!(from_step = failed_step, steps = stack.len(), "compensation started");
        report.record(SagaEvent::compensation_started(failed_step));

        let detached = ctx.detached();
        while let Some(index) = stack.pop() {
            let Some(spec) = self.steps.get(index) else {
                continue;
            };
            let step = spec.name();
            match spec.step().compensate(&detached, data).await {
                Ok(()) => {
                    tracing::info!(step, "compensation step completed");
                    report.record(SagaEvent::compensation_step_completed(step));
                }
                Err(e) => {
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    tracing::error!(step, error = %e, "compensation step failed, continuing");
                    report.record(SagaEvent::compensation_step_failed(step, e.to_string()));
                }
            }
        }

        report.record(SagaEvent::saga_failed(error.to_string(), true));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::builder::SagaBuilder;
    use crate::retry::RetryPolicy;
    use crate::state::SagaState;
    use crate::step::SagaStep;

    type Trace = Vec<String>;

    #[derive(Debug, PartialEq, thiserror::Error)]
    #[error("{0}")]
    struct TestError(String);

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct TestStep {
        name: &'static str,
        log: Log,
        compensable: bool,
        failures: Arc<AtomicU32>,
        compensation_fails: bool,
    }

    impl TestStep {
        fn plain(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: log.clone(),
                compensable: false,
                failures: Arc::new(AtomicU32::new(0)),
                compensation_fails: false,
            }
        }

        fn compensable(name: &'static str, log: &Log) -> Self {
            Self {
                compensable: true,
                ..Self::plain(name, log)
            }
        }

        /// Fails the first `times` executions.
        fn failing(mut self, times: u32) -> Self {
            self.failures = Arc::new(AtomicU32::new(times));
            self
        }

        fn with_failing_compensation(mut self) -> Self {
            self.compensation_fails = true;
            self
        }
    }

    #[async_trait]
    impl SagaStep<Trace, TestError> for TestStep {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, _ctx: &Context, data: &mut Trace) -> Result<(), TestError> {
            self.log.push(format!("execute:{}", self.name));
            let fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(TestError(format!("{} failed", self.name)));
            }
            data.push(self.name.to_string());
            Ok(())
        }

        fn is_compensable(&self) -> bool {
            self.compensable
        }

        async fn compensate(&self, ctx: &Context, data: &mut Trace) -> Result<(), TestError> {
            if ctx.is_cancelled() {
                return Err(TestError("compensation saw a cancelled context".to_string()));
            }
            self.log.push(format!("compensate:{}", self.name));
            if self.compensation_fails {
                return Err(TestError(format!("undo {} failed", self.name)));
            }
            data.retain(|entry| entry != self.name);
            Ok(())
        }
    }

    fn compensations(log: &Log) -> Vec<String> {
        log.entries()
            .into_iter()
            .filter(|entry| entry.starts_with("compensate:"))
            .collect()
    }

    #[tokio::test]
    async fn successful_saga_returns_final_data() {
        let log = Log::default();
        let saga = SagaBuilder::new("happy")
            .with_saga_step(TestStep::compensable("a", &log))
            .with_saga_step(TestStep::plain("b", &log))
            .build();

        let (result, report) = saga.execute_with_report(&Context::new(), Vec::new()).await;
        assert_eq!(result.unwrap(), vec!["a", "b"]);
        assert_eq!(report.state(), SagaState::Completed);
        assert_eq!(report.completed_steps(), ["a", "b"]);
        assert!(compensations(&log).is_empty());
    }

    #[tokio::test]
    async fn failure_compensates_completed_steps_in_reverse() {
        let log = Log::default();
        let saga = SagaBuilder::new("unwind")
            .with_saga_step(TestStep::compensable("a", &log))
            .with_saga_step(TestStep::compensable("b", &log))
            .with_saga_step(TestStep::compensable("c", &log))
            .with_saga_step(TestStep::compensable("d", &log).failing(1))
            .build();

        let (result, report) = saga.execute_with_report(&Context::new(), Vec::new()).await;
        let err = result.unwrap_err();
        assert!(matches!(&err, SagaError::StepFailed { step, .. } if step == "d"));
        assert_eq!(err.step_error(), Some(&TestError("d failed".to_string())));

        // The failing step never succeeded, so it is not compensated
        assert_eq!(
            compensations(&log),
            vec!["compensate:c", "compensate:b", "compensate:a"]
        );
        assert_eq!(report.compensated_steps(), ["c", "b", "a"]);
        assert_eq!(report.state(), SagaState::Compensated);
    }

    #[tokio::test]
    async fn plain_steps_are_not_compensated() {
        let log = Log::default();
        let saga = SagaBuilder::new("mixed")
            .with_saga_step(TestStep::compensable("a", &log))
            .with_saga_step(TestStep::plain("b", &log))
            .with_saga_step(TestStep::plain("c", &log).failing(1))
            .build();

        saga.execute(&Context::new(), Vec::new()).await.unwrap_err();
        assert_eq!(compensations(&log), vec!["compensate:a"]);
    }

    #[tokio::test]
    async fn failure_with_nothing_to_undo_is_failed() {
        let log = Log::default();
        let saga = SagaBuilder::new("early")
            .with_saga_step(TestStep::plain("a", &log).failing(1))
            .with_saga_step(TestStep::compensable("b", &log))
            .build();

        let (result, report) = saga.execute_with_report(&Context::new(), Vec::new()).await;
        assert!(result.is_err());
        assert_eq!(report.state(), SagaState::Failed);
        assert!(
            !report
                .events()
                .iter()
                .any(|e| matches!(e, SagaEvent::CompensationStarted { .. }))
        );
        // b never ran
        assert_eq!(log.entries(), vec!["execute:a"]);
    }

    #[tokio::test]
    async fn compensation_continues_past_a_failed_compensation() {
        let log = Log::default();
        let saga = SagaBuilder::new("resilient")
            .with_saga_step(TestStep::compensable("a", &log))
            .with_saga_step(TestStep::compensable("b", &log).with_failing_compensation())
            .with_saga_step(TestStep::plain("c", &log).failing(1))
            .build();

        let (result, report) = saga.execute_with_report(&Context::new(), Vec::new()).await;

        // Only the root cause is returned
        let err = result.unwrap_err();
        assert_eq!(err.step(), "c");
        assert_eq!(compensations(&log), vec!["compensate:b", "compensate:a"]);
        assert_eq!(report.compensated_steps(), ["a"]);
        assert_eq!(report.compensation_errors().len(), 1);
        assert_eq!(report.compensation_errors()[0].step, "b");
        assert_eq!(report.state(), SagaState::Compensated);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_step_succeeds_after_failures() {
        let log = Log::default();
        let saga = SagaBuilder::new("retry")
            .with_spec(
                StepSpec::new(TestStep::plain("flaky", &log).failing(2))
                    .with_retry(RetryPolicy::new(2, Duration::from_secs(2))),
            )
            .build();

        let start = tokio::time::Instant::now();
        let (result, report) = saga.execute_with_report(&Context::new(), Vec::new()).await;
        assert_eq!(result.unwrap(), vec!["flaky"]);
        assert_eq!(report.attempts("flaky"), 3);
        assert!(start.elapsed() >= Duration::from_secs(4));
        let retries = report
            .events()
            .iter()
            .filter(|e| matches!(e, SagaEvent::StepRetried { .. }))
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_unwind_earlier_steps() {
        let log = Log::default();
        let saga = SagaBuilder::new("exhaust")
            .with_saga_step(TestStep::compensable("a", &log))
            .with_spec(
                StepSpec::new(
                    TestStep::compensable("flaky", &log).failing(u32::MAX),
                )
                .with_retry(RetryPolicy::new(2, Duration::from_secs(1))),
            )
            .build();

        let err = saga.execute(&Context::new(), Vec::new()).await.unwrap_err();
        match err {
            SagaError::RetryExhausted { step, attempts, .. } => {
                assert_eq!(step, "flaky");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }

        let executions = log
            .entries()
            .iter()
            .filter(|e| *e == "execute:flaky")
            .count();
        assert_eq!(executions, 3);
        // Its own compensation is not run
        assert_eq!(compensations(&log), vec!["compensate:a"]);
    }

    #[tokio::test]
    async fn cancelled_context_fails_fast_and_compensates_detached() {
        let log = Log::default();
        let ctx = Context::new();
        let cancel = ctx.clone();
        let saga = SagaBuilder::<Trace, TestError>::new("cancel")
            .with_saga_step(TestStep::compensable("a", &log))
            .with_step("cancel", move |_ctx, _data| {
                cancel.cancel();
                Box::pin(async { Ok(()) })
            })
            .with_saga_step(TestStep::plain("never", &log))
            .build();

        let (result, report) = saga.execute_with_report(&ctx, Vec::new()).await;
        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.step(), "never");
        assert!(!log.entries().contains(&"execute:never".to_string()));

        // Compensation ran even though the run's context is cancelled
        assert_eq!(report.compensated_steps(), ["a"]);
        assert!(report.compensation_errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_retry_delay_reports_last_error() {
        let log = Log::default();
        let ctx = Context::new();
        let saga = SagaBuilder::new("cancel-retry")
            .with_spec(
                StepSpec::new(TestStep::plain("flaky", &log).failing(u32::MAX))
                    .with_retry(RetryPolicy::new(5, Duration::from_secs(60))),
            )
            .build();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let (result, report) = saga.execute_with_report(&ctx, Vec::new()).await;
        match result.unwrap_err() {
            SagaError::Cancelled {
                step,
                attempts,
                last_error,
            } => {
                assert_eq!(step, "flaky");
                assert_eq!(attempts, 1);
                assert_eq!(last_error, Some(TestError("flaky failed".to_string())));
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert!(report.events().iter().any(|e| matches!(
            e,
            SagaEvent::StepFailed { error, .. } if error == "flaky failed"
        )));
        assert_eq!(report.attempts("flaky"), 1);
    }

    #[tokio::test]
    async fn closure_steps_share_data() {
        let saga = SagaBuilder::<Vec<u32>, TestError>::new("closures")
            .with_step("one", |_ctx, data| {
                Box::pin(async move {
                    data.push(1);
                    Ok(())
                })
            })
            .with_compensable_step(
                "two",
                |_ctx, data| {
                    Box::pin(async move {
                        let next = data[0] + 1;
                        data.push(next);
                        Ok(())
                    })
                },
                |_ctx, data| {
                    Box::pin(async move {
                        data.pop();
                        Ok(())
                    })
                },
            )
            .with_retryable_step(
                "three",
                |_ctx, data| {
                    Box::pin(async move {
                        data.push(3);
                        Ok(())
                    })
                },
                1,
                Duration::from_millis(1),
            )
            .build();

        let data = saga.execute(&Context::new(), Vec::new()).await.unwrap();
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn saga_can_run_concurrently() {
        let log = Log::default();
        let saga = Arc::new(
            SagaBuilder::new("shared")
                .with_saga_step(TestStep::plain("a", &log))
                .build(),
        );

        let runs: Vec<_> = (0..4)
            .map(|_| {
                let saga = saga.clone();
                tokio::spawn(async move { saga.execute(&Context::new(), Vec::new()).await })
            })
            .collect();
        for run in runs {
            assert_eq!(run.await.unwrap().unwrap(), vec!["a"]);
        }
    }
}
