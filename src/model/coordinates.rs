//! Positions: registered points and captured fixes.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Why a point or fix failed validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinateError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),

    #[error("accuracy {0} must be a non-negative number of meters")]
    Accuracy(f64),
}

/// A bare location on the globe, in decimal degrees.
///
/// Customer locations are registered as points; they carry no fix metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Builds a point, rejecting out-of-range or non-finite degrees.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        let point = Self {
            latitude,
            longitude,
        };
        point.validate()?;
        Ok(point)
    }

    pub fn validate(&self) -> Result<(), CoordinateError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(CoordinateError::Latitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(CoordinateError::Longitude(self.longitude));
        }
        Ok(())
    }
}

/// A position fix reported by the platform.
///
/// Immutable once produced. `accuracy_meters` is the platform's reported
/// radius of uncertainty, absent when the platform gives none.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
    pub captured_at: Timestamp,
}

impl Coordinates {
    /// Builds a fix, validating ranges and accuracy.
    pub fn new(
        latitude: f64,
        longitude: f64,
        accuracy_meters: Option<f64>,
        captured_at: Timestamp,
    ) -> Result<Self, CoordinateError> {
        let fix = Self {
            latitude,
            longitude,
            accuracy_meters,
            captured_at,
        };
        fix.validate()?;
        Ok(fix)
    }

    pub fn validate(&self) -> Result<(), CoordinateError> {
        self.point().validate()?;
        if let Some(accuracy) = self.accuracy_meters
            && !(accuracy.is_finite() && accuracy >= 0.0)
        {
            return Err(CoordinateError::Accuracy(accuracy));
        }
        Ok(())
    }

    /// The location of this fix without its metadata.
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Discrete fix quality, derived from the reported accuracy radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}
