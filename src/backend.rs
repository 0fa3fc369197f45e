//! The data provider the workflow depends on.
//!
//! The workflow never talks to a REST API directly. It calls a
//! [`VisitBackend`], so the network-backed implementation and the
//! in-memory [`MemoryBackend`] are interchangeable.

mod memory;

pub use memory::{MemoryBackend, TaskTemplate};

use std::future::Future;

use crate::model::{
    Brand, CreatedVisit, Customer, SubmissionReceipt, VisitDraft, VisitSubmission,
};

/// Errors that can occur while talking to the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend rejected the request: {0}")]
    Rejected(String),
}

pub type Result<T> = core::result::Result<T, BackendError>;

/// Customer, brand and visit persistence.
pub trait VisitBackend {
    /// Customers whose name contains `query` (case-insensitive). An empty
    /// query lists all customers.
    fn find_customers(&self, query: &str) -> impl Future<Output = Result<Vec<Customer>>> + Send;

    fn list_brands(&self) -> impl Future<Output = Result<Vec<Brand>>> + Send;

    /// Open a visit and return its task list.
    ///
    /// Registers the customer when the draft names a new one. A session
    /// registers at most one customer: later drafts from the same session
    /// update that registration instead of adding another.
    fn create_visit(&self, draft: &VisitDraft) -> impl Future<Output = Result<CreatedVisit>> + Send;

    /// Persist a completed visit, override records included.
    fn submit_visit(
        &self,
        submission: &VisitSubmission,
    ) -> impl Future<Output = Result<SubmissionReceipt>> + Send;
}
