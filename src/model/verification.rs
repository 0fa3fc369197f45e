//! Proximity verification outputs and the override that can stand in for one.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::{Coordinates, QualityTier};

/// The outcome of checking one fix against one target.
///
/// Derived, never mutated. Every new fix produces a new result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub within_threshold: bool,
    pub distance_meters: f64,
    pub threshold_meters: f64,
    pub quality_tier: QualityTier,
}

/// An agent's decision to proceed although the fix was out of range.
///
/// Immutable once created. Submitted verbatim so the backend can audit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRecord {
    pub justification: String,
    pub distance_at_override_meters: f64,
    pub timestamp: Timestamp,
}

/// What satisfied the location gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProximityProof {
    /// The fix was within the threshold.
    Verified {
        fix: Coordinates,
        result: VerificationResult,
    },

    /// The fix was out of range and the agent recorded an override.
    Overridden {
        fix: Coordinates,
        result: VerificationResult,
        record: OverrideRecord,
    },
}

impl ProximityProof {
    pub fn fix(&self) -> &Coordinates {
        match self {
            Self::Verified { fix, .. } | Self::Overridden { fix, .. } => fix,
        }
    }

    pub fn result(&self) -> &VerificationResult {
        match self {
            Self::Verified { result, .. } | Self::Overridden { result, .. } => result,
        }
    }

    pub fn override_record(&self) -> Option<&OverrideRecord> {
        match self {
            Self::Verified { .. } => None,
            Self::Overridden { record, .. } => Some(record),
        }
    }
}
