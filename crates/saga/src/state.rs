//! Lifecycle of a saga run, as folded from its journal.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a saga run currently is.
///
/// ```text
/// not_started -> running -> completed
///                        -> compensating -> compensated
///                        -> failed
/// ```
///
/// `failed` means the first step broke and there was nothing to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    #[default]
    NotStarted,
    Running,
    Compensating,
    Completed,
    Compensated,
    Failed,
}

impl SagaState {
    /// No further journal entries change a run in this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Failed)
    }

    /// The run ended without applying all its steps.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Compensated | Self::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Compensating => "compensating",
            Self::Completed => "completed",
            Self::Compensated => "compensated",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
