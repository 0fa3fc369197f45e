use crate::audit::OverrideError;
use crate::backend::BackendError;
use crate::location::LocationError;
use crate::model::TaskId;

use super::WorkflowStep;

/// What the agent can do about a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Grant location permission in the device settings.
    EnableLocation,
    Retry,

    /// Change the input that failed the gate.
    FixInput,

    /// Capture a new fix.
    RefreshLocation,

    /// Proceed anyway with a recorded justification.
    OverrideWithJustification,
}

/// Errors surfaced by the visit workflow.
///
/// None of these end the visit; each is handled at the step that raised it.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Location(#[from] LocationError),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("{distance_meters:.1} m from the customer; the limit is {threshold_meters:.0} m")]
    OutOfRange {
        distance_meters: f64,
        threshold_meters: f64,
    },

    #[error("location accuracy is {accuracy_meters:.0} m; at most {max_meters:.0} m is accepted")]
    PoorAccuracy {
        accuracy_meters: f64,
        max_meters: f64,
    },

    #[error(transparent)]
    Override(#[from] OverrideError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("fix arrived for a superseded request")]
    StaleFix,

    #[error("{action} is only available during {expected}, not {actual}")]
    WrongStep {
        action: &'static str,
        expected: WorkflowStep,
        actual: WorkflowStep,
    },

    #[error("the visit is already complete")]
    Completed,

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("task already completed: {0}")]
    TaskAlreadyCompleted(TaskId),

    #[error("task not started: {0}")]
    TaskNotStarted(TaskId),
}

impl WorkflowError {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailed(reason.into())
    }

    /// Recoveries to offer the agent, most useful first.
    pub fn recoveries(&self) -> &'static [Recovery] {
        match self {
            Self::Location(LocationError::PermissionDenied { .. }) => &[Recovery::EnableLocation],
            Self::Location(
                LocationError::PositionUnavailable { .. } | LocationError::Timeout { .. },
            )
            | Self::Backend(_) => &[Recovery::Retry],
            Self::ValidationFailed(_)
            | Self::Override(OverrideError::BlankJustification)
            | Self::TaskNotStarted(_) => &[Recovery::FixInput],
            Self::OutOfRange { .. } => &[
                Recovery::RefreshLocation,
                Recovery::OverrideWithJustification,
            ],
            Self::PoorAccuracy { .. } => &[Recovery::RefreshLocation],
            Self::Location(LocationError::Cancelled)
            | Self::Override(_)
            | Self::StaleFix
            | Self::WrongStep { .. }
            | Self::Completed
            | Self::UnknownTask(_)
            | Self::TaskAlreadyCompleted(_) => &[],
        }
    }
}

pub type Result<T> = core::result::Result<T, WorkflowError>;
