//! Saga error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a saga run failed.
///
/// Only the root cause is reported. Compensation failures during the unwind
/// are logged and collected in the run's
/// [`SagaReport`](crate::SagaReport) instead.
#[derive(Debug, Error)]
pub enum SagaError<E> {
    /// A step failed on its only attempt.
    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: E,
    },

    /// A retryable step failed on every attempt it was allowed.
    #[error("step '{step}' failed after {attempts} attempts: {source}")]
    RetryExhausted {
        step: String,
        attempts: u32,
        #[source]
        source: E,
    },

    /// The context was cancelled, either before the step started
    /// (`attempts` is zero) or while it waited to be retried. In the latter
    /// case `last_error` is the error of its final attempt.
    #[error("step '{step}' cancelled after {attempts} attempts")]
    Cancelled {
        step: String,
        attempts: u32,
        #[source]
        last_error: Option<E>,
    },
}

impl<E> SagaError<E> {
    /// Returns the name of the step that failed.
    pub fn step(&self) -> &str {
        match self {
            SagaError::StepFailed { step, .. }
            | SagaError::RetryExhausted { step, .. }
            | SagaError::Cancelled { step, .. } => step,
        }
    }

    /// Returns how many times the failing step ran.
    pub fn attempts(&self) -> u32 {
        match self {
            SagaError::StepFailed { .. } => 1,
            SagaError::RetryExhausted { attempts, .. }
            | SagaError::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Returns the step's own error, if it ran.
    pub fn step_error(&self) -> Option<&E> {
        match self {
            SagaError::StepFailed { source, .. } | SagaError::RetryExhausted { source, .. } => {
                Some(source)
            }
            SagaError::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SagaError::Cancelled { .. })
    }
}

/// A compensation that failed while unwinding.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("compensation for step '{step}' failed: {message}")]
pub struct CompensationError {
    /// Name of the step whose compensation failed.
    pub step: String,
    /// The compensation's error message.
    pub message: String,
}
