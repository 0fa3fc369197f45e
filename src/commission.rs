//! Commission preview: flat per-unit rates applied to completed work.
//!
//! The backend computes the ledger amount independently. This preview only
//! tells the agent what the visit should earn.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::{CustomerChoice, Task, TaskKind};

/// A monetary amount in minor units (cents).
///
/// Parsed from and displayed as a two-place decimal string, so arithmetic
/// stays exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount {
    cents: i64,
}

impl Amount {
    pub const ZERO: Self = Self { cents: 0 };

    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub const fn cents(self) -> i64 {
        self.cents
    }

    /// This amount multiplied by a unit count, saturating at the `i64`
    /// bounds.
    pub fn times(self, units: u32) -> Self {
        Self {
            cents: self.cents.saturating_mul(i64::from(units)),
        }
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            cents: self.cents.saturating_add(rhs.cents),
        }
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, a| acc + a)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Why a decimal string could not be read as an [`Amount`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount '{0}': expected a decimal with at most two places")]
pub struct ParseAmountError(String);

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAmountError(s.to_string());
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty()
            || frac.len() > 2
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(err());
        }

        let whole: i64 = whole.parse().map_err(|_| err())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| err())? * 10,
            _ => frac.parse().map_err(|_| err())?,
        };
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac))
            .ok_or_else(err)?;

        Ok(Self {
            cents: if negative { -cents } else { cents },
        })
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Flat per-unit rates, one per task kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CommissionRates {
    pub currency: String,
    pub survey: Amount,
    pub board_placement: Amount,
    pub product_distribution: Amount,
    pub merchandising: Amount,
    pub photo_capture: Amount,
    pub customer_registration: Amount,
}

impl Default for CommissionRates {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            survey: Amount::from_cents(500),
            board_placement: Amount::from_cents(1000),
            product_distribution: Amount::from_cents(50),
            merchandising: Amount::from_cents(800),
            photo_capture: Amount::from_cents(200),
            customer_registration: Amount::from_cents(1500),
        }
    }
}

/// One line of a commission preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionLine {
    pub kind: TaskKind,
    pub units: u32,
    pub rate: Amount,
    pub amount: Amount,
}

/// A commission preview with its per-kind lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commission {
    pub currency: String,
    pub lines: Vec<CommissionLine>,
    pub total: Amount,
}

impl CommissionRates {
    pub fn rate(&self, kind: TaskKind) -> Amount {
        match kind {
            TaskKind::Survey => self.survey,
            TaskKind::BoardPlacement => self.board_placement,
            TaskKind::ProductDistribution => self.product_distribution,
            TaskKind::Merchandising => self.merchandising,
            TaskKind::PhotoCapture => self.photo_capture,
            TaskKind::CustomerRegistration => self.customer_registration,
        }
    }

    /// Total commission for the given completed unit counts.
    pub fn compute(&self, completed: &BTreeMap<TaskKind, u32>) -> Amount {
        completed
            .iter()
            .map(|(&kind, &units)| self.rate(kind).times(units))
            .sum()
    }

    /// Per-kind breakdown. Kinds with zero units are omitted.
    pub fn breakdown(&self, completed: &BTreeMap<TaskKind, u32>) -> Commission {
        let lines: Vec<CommissionLine> = completed
            .iter()
            .filter(|&(_, &units)| units > 0)
            .map(|(&kind, &units)| {
                let rate = self.rate(kind);
                CommissionLine {
                    kind,
                    units,
                    rate,
                    amount: rate.times(units),
                }
            })
            .collect();
        let total = lines.iter().map(|l| l.amount).sum();
        Commission {
            currency: self.currency.clone(),
            lines,
            total,
        }
    }
}

/// Completed units per kind for a visit.
///
/// Registering a new customer counts as one customer-registration unit.
pub fn completed_units(customer: &CustomerChoice, tasks: &[Task]) -> BTreeMap<TaskKind, u32> {
    let mut counts = BTreeMap::new();
    for task in tasks.iter().filter(|t| t.is_completed()) {
        let units = counts.entry(task.kind).or_insert(0_u32);
        *units = units.saturating_add(task.units);
    }
    if customer.is_new() {
        *counts.entry(TaskKind::CustomerRegistration).or_insert(0) += 1;
    }
    counts
}
