//! Core data model for visitgate.
//!
//! These types describe a field visit: where the agent is, where the
//! customer is, what was verified or overridden, and what work was done.

mod coordinates;
mod customer;
mod task;
mod verification;
mod visit;

pub use coordinates::{CoordinateError, Coordinates, GeoPoint, QualityTier};
pub use customer::{Brand, BrandId, Customer, CustomerChoice, CustomerId};
pub use task::{CompletionState, Evidence, Task, TaskId, TaskKind};
pub use verification::{OverrideRecord, ProximityProof, VerificationResult};
pub use visit::{
    CompletionRecord, CreatedVisit, SubmissionReceipt, VisitDraft, VisitId, VisitKind,
    VisitSubmission, VisitSummary,
};
