//! Visit types: what is sent to the backend and what comes back.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BrandId, CustomerChoice, CustomerId, OverrideRecord, ProximityProof, Task};
use crate::commission::Commission;

/// The kind of visit, which sets the proximity threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VisitKind {
    /// On-foot field-marketing visit. Tight radius.
    FieldMarketing,

    /// Van-sales stop. The wider radius absorbs vehicle positioning error.
    VanSales,
}

impl fmt::Display for VisitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FieldMarketing => "field-marketing",
            Self::VanSales => "van-sales",
        })
    }
}

/// Backend identifier for a created visit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitId(pub String);

impl fmt::Display for VisitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request to open a visit once brands are chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitDraft {
    pub session_id: Uuid,
    pub kind: VisitKind,
    pub customer: CustomerChoice,
    pub proof: ProximityProof,
    pub brand_ids: Vec<BrandId>,
}

/// The backend's answer to a [`VisitDraft`]: the visit and its task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedVisit {
    pub visit_id: VisitId,

    /// The visited customer. Newly registered when the draft named a new one.
    pub customer_id: CustomerId,

    pub brand_ids: Vec<BrandId>,
    pub tasks: Vec<Task>,
}

/// A completed session, as submitted for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitSubmission {
    pub session_id: Uuid,
    pub visit_id: VisitId,
    pub kind: VisitKind,
    pub customer: CustomerChoice,

    /// Carries the override record verbatim when one satisfied the gate.
    pub proof: ProximityProof,

    /// Overrides recorded against fixes that were later replaced.
    pub superseded_overrides: Vec<OverrideRecord>,

    pub tasks: Vec<Task>,
    pub started_at: Timestamp,
}

/// Identifiers the backend assigns on successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub visit_id: VisitId,
    pub commission_id: Option<String>,
}

/// Emitted when a workflow reaches completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub submission: VisitSubmission,
    pub receipt: SubmissionReceipt,

    /// Client-side preview. The backend ledger is authoritative.
    pub commission: Commission,

    pub summary: VisitSummary,

    pub completed_at: Timestamp,
}

/// Task progress and elapsed time of a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitSummary {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub mandatory_tasks: usize,
    pub completed_mandatory: usize,

    /// Completed share of all tasks, rounded. Zero for a visit with no tasks.
    pub completion_percent: usize,

    /// Whole minutes from start, rounded.
    pub duration_minutes: i64,
}

impl VisitSummary {
    pub fn of(tasks: &[Task], started_at: Timestamp, until: Timestamp) -> Self {
        let total_tasks = tasks.len();
        let completed_tasks = tasks.iter().filter(|t| t.is_completed()).count();
        let mandatory_tasks = tasks.iter().filter(|t| t.is_mandatory).count();
        let completed_mandatory = tasks
            .iter()
            .filter(|t| t.is_mandatory && t.is_completed())
            .count();
        let completion_percent = if total_tasks == 0 {
            0
        } else {
            (completed_tasks * 100 + total_tasks / 2) / total_tasks
        };
        let seconds = until.duration_since(started_at).as_secs();

        Self {
            total_tasks,
            completed_tasks,
            mandatory_tasks,
            completed_mandatory,
            completion_percent,
            duration_minutes: (seconds + 30).div_euclid(60),
        }
    }
}
