//! Geodesic distance and fix-quality classification.
//!
//! Distance uses the haversine formula on a sphere of radius 6,371,000 m,
//! a spherical approximation of the WGS-84 ellipsoid.

use crate::model::{GeoPoint, QualityTier};

/// Mean Earth radius used for all distance calculations.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Accuracy at or under this radius is [`QualityTier::High`].
pub const HIGH_QUALITY_MAX_METERS: f64 = 10.0;

/// Accuracy at or under this radius (and above the high bound) is
/// [`QualityTier::Medium`].
pub const MEDIUM_QUALITY_MAX_METERS: f64 = 50.0;

/// Great-circle distance between two points, in meters.
///
/// Inputs must already be validated; out-of-range degrees produce a
/// meaningless (but finite) result rather than an error.
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Classify a reported accuracy radius.
pub fn quality_tier(accuracy_meters: f64) -> QualityTier {
    if accuracy_meters <= HIGH_QUALITY_MAX_METERS {
        QualityTier::High
    } else if accuracy_meters <= MEDIUM_QUALITY_MAX_METERS {
        QualityTier::Medium
    } else {
        QualityTier::Low
    }
}

/// Classify an optional accuracy. A fix that reports none is trusted least.
pub fn quality_of(accuracy_meters: Option<f64>) -> QualityTier {
    accuracy_meters.map_or(QualityTier::Low, quality_tier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(latitude: f64, longitude: f64) -> GeoPoint {
        GeoPoint::new(latitude, longitude).unwrap()
    }

    #[test]
    fn london_tenth_degree_south() {
        let d = distance_meters(&point(51.5074, -0.1278), &point(51.4074, -0.1278));
        assert!((d - 11_119.0).abs() < 50.0, "got {d}");
    }

    #[test]
    fn symmetric() {
        let pairs = [
            (point(51.5074, -0.1278), point(48.8566, 2.3522)),
            (point(-33.9249, 18.4241), point(-26.2041, 28.0473)),
            (point(0.0, 179.9), point(0.0, -179.9)),
            (point(89.9, 0.0), point(-89.9, 45.0)),
        ];
        for (a, b) in pairs {
            assert_eq!(distance_meters(&a, &b), distance_meters(&b, &a));
        }
    }

    #[test]
    fn identical_points_are_zero() {
        for p in [point(0.0, 0.0), point(51.5074, -0.1278), point(-90.0, 180.0)] {
            assert_eq!(distance_meters(&p, &p), 0.0);
        }
    }

    #[test]
    fn distinct_points_are_positive() {
        let d = distance_meters(&point(10.0, 10.0), &point(10.000_001, 10.0));
        assert!(d > 0.0);
    }

    #[test]
    fn crosses_antimeridian_the_short_way() {
        let d = distance_meters(&point(0.0, 179.9), &point(0.0, -179.9));
        assert!(d < 25_000.0, "got {d}");
    }

    #[test]
    fn quality_tier_boundaries() {
        assert_eq!(quality_tier(0.0), QualityTier::High);
        assert_eq!(quality_tier(10.0), QualityTier::High);
        assert_eq!(quality_tier(10.0001), QualityTier::Medium);
        assert_eq!(quality_tier(50.0), QualityTier::Medium);
        assert_eq!(quality_tier(50.0001), QualityTier::Low);
        assert_eq!(quality_tier(f64::INFINITY), QualityTier::Low);
    }

    #[test]
    fn missing_accuracy_is_low() {
        assert_eq!(quality_of(None), QualityTier::Low);
        assert_eq!(quality_of(Some(4.0)), QualityTier::High);
    }
}
