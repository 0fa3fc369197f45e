//! Proximity verification: is this fix close enough to that target?

use crate::geo;
use crate::model::{Coordinates, GeoPoint, VerificationResult};

/// Verify a fix against a target point.
///
/// The threshold is inclusive: a fix exactly `threshold_meters` away passes.
/// Nothing is cached; callers verify every new fix.
pub fn verify(
    current: &Coordinates,
    target: &GeoPoint,
    threshold_meters: f64,
) -> VerificationResult {
    let distance_meters = geo::distance_meters(&current.point(), target);
    VerificationResult {
        within_threshold: distance_meters <= threshold_meters,
        distance_meters,
        threshold_meters,
        quality_tier: geo::quality_of(current.accuracy_meters),
    }
}
