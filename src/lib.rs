//! Proximity-gated field visits.
//!
//! A field agent may only record work at a customer after proving, with a
//! device position fix, that they stand within a configured radius of the
//! customer's registered location, or after recording a justified override.
//! [`workflow::VisitWorkflow`] enforces that gate and the ones around it.

pub mod audit;
pub mod backend;
pub mod commission;
pub mod config;
pub mod geo;
pub mod location;
pub mod model;
pub mod proximity;
pub mod workflow;
