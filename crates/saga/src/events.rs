//! Journal entries recorded while a saga runs.

use chrono::{DateTime, Utc};
use common::OperationId;
use serde::{Deserialize, Serialize};

/// One entry in a saga run's journal.
///
/// The executor appends these in order. Folding them with
/// [`SagaReport::apply`](crate::SagaReport::apply) rebuilds the run's
/// outcome, so a stored journal is enough to explain what a run did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SagaEvent {
    SagaStarted {
        saga: String,
        operation_id: Option<OperationId>,
        at: DateTime<Utc>,
    },
    StepStarted {
        step: String,
    },
    /// `attempt` failed and the step will run again after its delay.
    StepRetried {
        step: String,
        attempt: u32,
        error: String,
    },
    StepCompleted {
        step: String,
        attempts: u32,
    },
    StepFailed {
        step: String,
        error: String,
    },
    CompensationStarted {
        failed_step: String,
    },
    StepCompensated {
        step: String,
    },
    /// Logged and skipped; the remaining compensations still run.
    CompensationFailed {
        step: String,
        error: String,
    },
    SagaCompleted {
        at: DateTime<Utc>,
    },
    SagaFailed {
        reason: String,
        compensated: bool,
        at: DateTime<Utc>,
    },
}

impl SagaEvent {
    pub fn saga_started(saga: impl Into<String>, operation_id: Option<OperationId>) -> Self {
        Self::SagaStarted {
            saga: saga.into(),
            operation_id,
            at: Utc::now(),
        }
    }

    pub fn step_started(step: impl Into<String>) -> Self {
        Self::StepStarted { step: step.into() }
    }

    pub fn step_retried(step: impl Into<String>, attempt: u32, error: impl Into<String>) -> Self {
        Self::StepRetried {
            step: step.into(),
            attempt,
            error: error.into(),
        }
    }

    pub fn step_completed(step: impl Into<String>, attempts: u32) -> Self {
        Self::StepCompleted {
            step: step.into(),
            attempts,
        }
    }

    pub fn step_failed(step: impl Into<String>, error: impl Into<String>) -> Self {
        Self::StepFailed {
            step: step.into(),
            error: error.into(),
        }
    }

    pub fn compensation_started(failed_step: impl Into<String>) -> Self {
        Self::CompensationStarted {
            failed_step: failed_step.into(),
        }
    }

    pub fn compensation_step_completed(step: impl Into<String>) -> Self {
        Self::StepCompensated { step: step.into() }
    }

    pub fn compensation_step_failed(step: impl Into<String>, error: impl Into<String>) -> Self {
        Self::CompensationFailed {
            step: step.into(),
            error: error.into(),
        }
    }

    pub fn saga_completed() -> Self {
        Self::SagaCompleted { at: Utc::now() }
    }

    pub fn saga_failed(reason: impl Into<String>, compensated: bool) -> Self {
        Self::SagaFailed {
            reason: reason.into(),
            compensated,
            at: Utc::now(),
        }
    }

    /// The step this entry is about, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step }
            | Self::StepRetried { step, .. }
            | Self::StepCompleted { step, .. }
            | Self::StepFailed { step, .. }
            | Self::StepCompensated { step }
            | Self::CompensationFailed { step, .. } => Some(step),
            Self::CompensationStarted { failed_step } => Some(failed_step),
            Self::SagaStarted { .. } | Self::SagaCompleted { .. } | Self::SagaFailed { .. } => None,
        }
    }
}
