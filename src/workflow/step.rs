//! Workflow steps and the data each one carries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{CompletionRecord, CustomerChoice, ProximityProof, VisitId};

/// The five steps of a visit, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowStep {
    CustomerSelection,
    LocationVerification,
    TaskSelection,
    TaskExecution,
    Completion,
}

impl WorkflowStep {
    pub fn is_terminal(self) -> bool {
        self == Self::Completion
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::CustomerSelection => "customer selection",
            Self::LocationVerification => "location verification",
            Self::TaskSelection => "task selection",
            Self::TaskExecution => "task execution",
            Self::Completion => "completion",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The current step together with what earlier gates established.
///
/// Each variant holds exactly what its step may rely on, so a later step
/// cannot be reached without the proof the earlier gates produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "camelCase")]
pub enum Stage {
    CustomerSelection,

    LocationVerification {
        customer: CustomerChoice,
    },

    TaskSelection {
        customer: CustomerChoice,
        proof: ProximityProof,
    },

    #[serde(rename_all = "camelCase")]
    TaskExecution {
        customer: CustomerChoice,
        proof: ProximityProof,
        visit_id: VisitId,
    },

    Completion(Box<CompletionRecord>),
}

impl Stage {
    pub fn step(&self) -> WorkflowStep {
        match self {
            Self::CustomerSelection => WorkflowStep::CustomerSelection,
            Self::LocationVerification { .. } => WorkflowStep::LocationVerification,
            Self::TaskSelection { .. } => WorkflowStep::TaskSelection,
            Self::TaskExecution { .. } => WorkflowStep::TaskExecution,
            Self::Completion(_) => WorkflowStep::Completion,
        }
    }

    /// The customer committed by the first gate, once past it.
    pub fn customer(&self) -> Option<&CustomerChoice> {
        match self {
            Self::CustomerSelection => None,
            Self::LocationVerification { customer }
            | Self::TaskSelection { customer, .. }
            | Self::TaskExecution { customer, .. } => Some(customer),
            Self::Completion(record) => Some(&record.submission.customer),
        }
    }

    /// The proof committed by the location gate, once past it.
    pub fn proof(&self) -> Option<&ProximityProof> {
        match self {
            Self::CustomerSelection | Self::LocationVerification { .. } => None,
            Self::TaskSelection { proof, .. } | Self::TaskExecution { proof, .. } => Some(proof),
            Self::Completion(record) => Some(&record.submission.proof),
        }
    }
}
