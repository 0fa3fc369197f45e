//! Visit tasks: the activities an agent performs at an outlet.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::BrandId;

/// Backend identifier for a task within a visit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of activity. Commission rates are set per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Survey,
    BoardPlacement,
    ProductDistribution,
    Merchandising,
    PhotoCapture,
    CustomerRegistration,
}

impl TaskKind {
    /// Whether the task is counted per distributed item rather than once.
    pub fn is_per_unit(self) -> bool {
        matches!(self, Self::ProductDistribution)
    }

    /// Whether completion needs photo evidence.
    pub fn needs_photo(self) -> bool {
        matches!(self, Self::BoardPlacement | Self::PhotoCapture)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Survey => "survey",
            Self::BoardPlacement => "board-placement",
            Self::ProductDistribution => "product-distribution",
            Self::Merchandising => "merchandising",
            Self::PhotoCapture => "photo-capture",
            Self::CustomerRegistration => "customer-registration",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a task stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionState {
    Pending,
    InProgress,
    Completed,
}

/// Opaque camera output attached to a task as evidence.
///
/// Never inspected here; the bytes travel to the backend as captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub captured_at: Timestamp,
}

/// One activity in a visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub brand_id: Option<BrandId>,
    pub is_mandatory: bool,
    pub state: CompletionState,

    /// Units delivered on completion. One for most kinds; the item
    /// count for product distribution.
    pub units: u32,

    pub evidence: Vec<Evidence>,
}

impl Task {
    /// A fresh pending task.
    pub fn pending(
        id: TaskId,
        kind: TaskKind,
        brand_id: Option<BrandId>,
        is_mandatory: bool,
    ) -> Self {
        Self {
            id,
            kind,
            brand_id,
            is_mandatory,
            state: CompletionState::Pending,
            units: 0,
            evidence: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == CompletionState::Completed
    }

    /// Mandatory and not yet completed.
    pub fn is_blocking(&self) -> bool {
        self.is_mandatory && !self.is_completed()
    }
}
