//! Customers and brands, as the backend describes them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// Backend identifier for a customer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub String);

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered customer outlet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,

    /// Where the outlet was registered. Visits to customers without one
    /// cannot be location-verified.
    pub location: Option<GeoPoint>,
}

/// Who the visit is for, once the customer step has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CustomerChoice {
    /// An existing customer with a registered location.
    Existing {
        customer: Customer,
        location: GeoPoint,
    },

    /// A customer being registered during this visit.
    /// The verified fix becomes its location.
    New { name: String },
}

impl CustomerChoice {
    pub fn display_name(&self) -> &str {
        match self {
            Self::Existing { customer, .. } => &customer.name,
            Self::New { name } => name,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::New { .. })
    }
}

/// Backend identifier for a brand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrandId(pub String);

impl fmt::Display for BrandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A brand the agent can work on during a visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brand {
    pub id: BrandId,
    pub name: String,
}
