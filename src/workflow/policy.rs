use crate::commission::CommissionRates;
use crate::config::Config;
use crate::location::PositionOptions;
use crate::model::VisitKind;

/// The rules one workflow runs under. Fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowPolicy {
    pub threshold_meters: f64,

    /// Fixes coarser than this fail the location gate. Infinite disables
    /// the check.
    pub max_accuracy_meters: f64,

    pub carry_override_forward: bool,
    pub fix_options: PositionOptions,
    pub watch_options: PositionOptions,
    pub rates: CommissionRates,
}

impl WorkflowPolicy {
    pub fn from_config(config: &Config, kind: VisitKind) -> Self {
        Self {
            threshold_meters: config.threshold_meters(kind),
            max_accuracy_meters: config.max_accuracy_meters,
            carry_override_forward: config.carry_override_forward,
            fix_options: config.fix_options(),
            watch_options: config.watch_options(),
            rates: config.commission.clone(),
        }
    }

    /// Default policy for a visit kind.
    pub fn for_kind(kind: VisitKind) -> Self {
        Self::from_config(&Config::default(), kind)
    }
}
