//! visitgate configuration.
//!
//! Loaded from `~/.visitgate/config.toml`, or from an explicit path.
//! Every key is optional; a missing default file means default policy.
//!
//! ```toml
//! max-accuracy-meters = 100.0   # `inf` disables the accuracy gate
//! carry-override-forward = false
//!
//! [thresholds]
//! field-marketing = 10.0
//! van-sales = 50.0
//!
//! [location]
//! high-accuracy = true
//! timeout-ms = 10000
//! watch-timeout-ms = 30000
//! max-cached-age-ms = 0
//!
//! [commission]
//! currency = "USD"
//! board-placement = "10.00"
//! product-distribution = "0.50"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::commission::CommissionRates;
use crate::location::PositionOptions;
use crate::model::VisitKind;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// visitgate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub thresholds: Thresholds,

    /// Fixes reporting a coarser accuracy than this never pass the
    /// location gate, override or not.
    pub max_accuracy_meters: f64,

    /// Keep an override valid across later fixes instead of requiring
    /// fresh verification.
    pub carry_override_forward: bool,

    pub location: LocationConfig,
    pub commission: CommissionRates,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            max_accuracy_meters: 100.0,
            carry_override_forward: false,
            location: LocationConfig::default(),
            commission: CommissionRates::default(),
        }
    }
}

/// Proximity thresholds per visit kind, in meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Thresholds {
    pub field_marketing: f64,
    pub van_sales: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            field_marketing: 10.0,
            van_sales: 50.0,
        }
    }
}

/// How fixes are requested from the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LocationConfig {
    pub high_accuracy: bool,
    pub timeout_ms: u64,
    pub watch_timeout_ms: u64,
    pub max_cached_age_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_ms: 10_000,
            watch_timeout_ms: 30_000,
            max_cached_age_ms: 0,
        }
    }
}

impl Config {
    /// Load config from `path`, or from `~/.visitgate/config.toml` when
    /// none is given.
    ///
    /// An explicit path must exist. A missing default file yields
    /// [`Config::default`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        let contents = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !explicit => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        let config: Self =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// The default config file path: `~/.visitgate/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".visitgate").join("config.toml"))
    }

    /// The proximity threshold for a visit kind.
    pub fn threshold_meters(&self, kind: VisitKind) -> f64 {
        match kind {
            VisitKind::FieldMarketing => self.thresholds.field_marketing,
            VisitKind::VanSales => self.thresholds.van_sales,
        }
    }

    /// Options for single-shot fixes.
    pub fn fix_options(&self) -> PositionOptions {
        PositionOptions {
            high_accuracy: self.location.high_accuracy,
            timeout: Duration::from_millis(self.location.timeout_ms),
            max_cached_age: Duration::from_millis(self.location.max_cached_age_ms),
        }
    }

    /// Options for continuous watches.
    pub fn watch_options(&self) -> PositionOptions {
        PositionOptions {
            timeout: Duration::from_millis(self.location.watch_timeout_ms),
            ..self.fix_options()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = [
            ("thresholds.field-marketing", self.thresholds.field_marketing),
            ("thresholds.van-sales", self.thresholds.van_sales),
        ];
        for (key, value) in thresholds {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{key} must be a finite, non-negative number of meters"
                )));
            }
        }
        if self.max_accuracy_meters.is_nan() || self.max_accuracy_meters < 0.0 {
            return Err(ConfigError::Invalid(
                "max-accuracy-meters must be non-negative (or inf)".to_string(),
            ));
        }
        if self.location.timeout_ms == 0 || self.location.watch_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "location timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
