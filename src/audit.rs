//! Override recording: proceeding without proximity, on the record.

use jiff::Timestamp;

use crate::model::{OverrideRecord, VerificationResult};

/// Why an override was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverrideError {
    #[error("an override requires a justification")]
    BlankJustification,

    #[error("override is only available after a failed verification")]
    NotAvailable,
}

/// Record an override against the last verification.
///
/// The justification is stored trimmed. Blank text is rejected and no
/// record is produced.
pub fn record_override(
    justification: &str,
    last: &VerificationResult,
) -> Result<OverrideRecord, OverrideError> {
    let justification = justification.trim();
    if justification.is_empty() {
        return Err(OverrideError::BlankJustification);
    }

    let record = OverrideRecord {
        justification: justification.to_string(),
        distance_at_override_meters: last.distance_meters,
        timestamp: Timestamp::now(),
    };

    tracing::warn!(
        distance_meters = record.distance_at_override_meters,
        threshold_meters = last.threshold_meters,
        justification = %record.justification,
        "proximity override recorded"
    );

    Ok(record)
}
