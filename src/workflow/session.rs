//! Data captured during a visit.

use jiff::Timestamp;
use uuid::Uuid;

use crate::commission::Commission;
use crate::model::{
    Brand, BrandId, Coordinates, CreatedVisit, Customer, CustomerChoice, CustomerId,
    OverrideRecord, Task, TaskId, VerificationResult, VisitDraft, VisitKind, VisitSummary,
};

/// The customer picked at the first step, before the gate commits it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CustomerDraft {
    #[default]
    Unselected,
    Existing(Customer),

    /// Name as typed. Trimmed and checked by the gate.
    New(String),
}

/// What a fix was verified against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifiedAgainst {
    Customer(CustomerId),

    /// The fix itself, for a customer being registered here.
    NewCustomer,
}

impl VerifiedAgainst {
    pub fn of(customer: &CustomerChoice) -> Self {
        match customer {
            CustomerChoice::Existing { customer, .. } => Self::Customer(customer.id.clone()),
            CustomerChoice::New { .. } => Self::NewCustomer,
        }
    }
}

/// The most recent fix and its verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedFix {
    /// Increases with every fix applied to the session.
    pub sequence: u64,
    pub fix: Coordinates,
    pub against: VerifiedAgainst,
    pub result: VerificationResult,
}

/// Everything the agent has captured so far.
///
/// Moving between steps never clears any of it. Only a newer fix replaces
/// the previous one.
#[derive(Debug, Clone)]
pub struct VisitSession {
    pub(super) id: Uuid,
    pub(super) kind: VisitKind,
    pub(super) started_at: Timestamp,
    pub(super) customer: CustomerDraft,
    pub(super) latest: Option<VerifiedFix>,
    pub(super) fix_sequence: u64,
    pub(super) active_override: Option<OverrideRecord>,
    pub(super) superseded_overrides: Vec<OverrideRecord>,
    pub(super) selected_brands: Vec<Brand>,
    pub(super) visit: Option<CreatedVisit>,

    /// The draft `visit` was created from.
    pub(super) opened_with: Option<VisitDraft>,
    pub(super) commission: Option<Commission>,
}

impl VisitSession {
    pub(super) fn new(kind: VisitKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            started_at: Timestamp::now(),
            customer: CustomerDraft::Unselected,
            latest: None,
            fix_sequence: 0,
            active_override: None,
            superseded_overrides: Vec::new(),
            selected_brands: Vec::new(),
            visit: None,
            opened_with: None,
            commission: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> VisitKind {
        self.kind
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    pub fn customer(&self) -> &CustomerDraft {
        &self.customer
    }

    pub fn latest_fix(&self) -> Option<&VerifiedFix> {
        self.latest.as_ref()
    }

    /// The override recorded against the latest fix, if any.
    pub fn active_override(&self) -> Option<&OverrideRecord> {
        self.active_override.as_ref()
    }

    /// Overrides invalidated by later fixes, oldest first.
    pub fn superseded_overrides(&self) -> &[OverrideRecord] {
        &self.superseded_overrides
    }

    pub fn selected_brands(&self) -> &[Brand] {
        &self.selected_brands
    }

    /// Selected brand ids in sorted order.
    pub fn selected_brand_ids(&self) -> Vec<BrandId> {
        let mut ids: Vec<BrandId> = self.selected_brands.iter().map(|b| b.id.clone()).collect();
        ids.sort();
        ids
    }

    pub fn visit(&self) -> Option<&CreatedVisit> {
        self.visit.as_ref()
    }

    /// Tasks of the open visit. Empty until the visit is created.
    pub fn tasks(&self) -> &[Task] {
        self.visit.as_ref().map_or(&[], |v| v.tasks.as_slice())
    }

    pub(super) fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.visit
            .as_mut()
            .and_then(|v| v.tasks.iter_mut().find(|t| &t.id == id))
    }

    /// Task progress of the open visit and minutes elapsed up to `until`.
    pub fn summary(&self, until: Timestamp) -> VisitSummary {
        VisitSummary::of(self.tasks(), self.started_at, until)
    }

    /// Commission preview, set once the visit completes.
    pub fn commission(&self) -> Option<&Commission> {
        self.commission.as_ref()
    }
}
