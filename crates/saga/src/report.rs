//! Outcome of a saga run, folded from its journal.

use std::collections::BTreeMap;

use common::OperationId;

use crate::error::CompensationError;
use crate::events::SagaEvent;
use crate::state::SagaState;

/// What happened during one saga run.
///
/// Built by applying the run's [`SagaEvent`]s in order, so a report can
/// also be rebuilt from a stored journal.
#[derive(Debug, Clone, Default)]
pub struct SagaReport {
    saga_name: String,
    operation_id: Option<OperationId>,
    state: SagaState,
    completed_steps: Vec<String>,
    compensated_steps: Vec<String>,
    compensation_errors: Vec<CompensationError>,
    attempts: BTreeMap<String, u32>,
    failure_reason: Option<String>,
    events: Vec<SagaEvent>,
}

impl SagaReport {
    /// Rebuilds a report from a journal.
    pub fn from_events(events: impl IntoIterator<Item = SagaEvent>) -> Self {
        let mut report = Self::default();
        for event in events {
            report.record(event);
        }
        report
    }

    /// Applies `event` and keeps it in the journal.
    pub fn record(&mut self, event: SagaEvent) {
        self.apply(&event);
        self.events.push(event);
    }

    pub fn apply(&mut self, event: &SagaEvent) {
        match event {
            SagaEvent::SagaStarted {
                saga, operation_id, ..
            } => {
                self.saga_name = saga.clone();
                self.operation_id = *operation_id;
                self.state = SagaState::Running;
            }
            SagaEvent::StepStarted { step } => {
                self.attempts.insert(step.clone(), 1);
            }
            SagaEvent::StepRetried { step, attempt, .. } => {
                self.attempts.insert(step.clone(), attempt + 1);
            }
            SagaEvent::StepCompleted { step, attempts } => {
                self.completed_steps.push(step.clone());
                self.attempts.insert(step.clone(), *attempts);
            }
            SagaEvent::StepFailed { error, .. } => {
                self.failure_reason = Some(error.clone());
            }
            SagaEvent::CompensationStarted { .. } => {
                self.state = SagaState::Compensating;
            }
            SagaEvent::StepCompensated { step } => {
                self.compensated_steps.push(step.clone());
            }
            SagaEvent::CompensationFailed { step, error } => {
                self.compensation_errors.push(CompensationError {
                    step: step.clone(),
                    message: error.clone(),
                });
            }
            SagaEvent::SagaCompleted { .. } => {
                self.state = SagaState::Completed;
            }
            SagaEvent::SagaFailed {
                reason, compensated, ..
            } => {
                self.state = if *compensated {
                    SagaState::Compensated
                } else {
                    SagaState::Failed
                };
                self.failure_reason = Some(reason.clone());
            }
        }
    }
}

// Query methods
impl SagaReport {
    pub fn saga_name(&self) -> &str {
        &self.saga_name
    }

    pub fn operation_id(&self) -> Option<OperationId> {
        self.operation_id
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == SagaState::Completed
    }

    /// Steps that succeeded, in execution order.
    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    /// Steps successfully undone, in the order their compensations ran.
    pub fn compensated_steps(&self) -> &[String] {
        &self.compensated_steps
    }

    pub fn compensation_errors(&self) -> &[CompensationError] {
        &self.compensation_errors
    }

    /// Number of attempts `step` took; zero if it never started.
    pub fn attempts(&self, step: &str) -> u32 {
        self.attempts.get(step).copied().unwrap_or(0)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn events(&self) -> &[SagaEvent] {
        &self.events
    }
}
