//! The visit workflow.
//!
//! A visit moves through five steps in order. Each step has a gate, and
//! [`VisitWorkflow::next`] only advances when the gate passes. The location
//! gate needs a fix within the proximity threshold of the customer, or an
//! override recorded against an out-of-range fix. [`VisitWorkflow::back`]
//! moves one step back without clearing anything captured.
//!
//! Location requests are detached from the machine. [`request_fix`] hands
//! out a [`FixRequest`] the caller can await without holding the machine,
//! and [`apply_fix`] accepts the outcome only if no newer request, step
//! change or abort has superseded it.
//!
//! [`request_fix`]: VisitWorkflow::request_fix
//! [`apply_fix`]: VisitWorkflow::apply_fix

mod error;
mod policy;
mod session;
mod step;

pub use error::{Recovery, Result, WorkflowError};
pub use policy::WorkflowPolicy;
pub use session::{CustomerDraft, VerifiedAgainst, VerifiedFix, VisitSession};
pub use step::{Stage, WorkflowStep};

use jiff::Timestamp;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{self, OverrideError};
use crate::backend::VisitBackend;
use crate::commission;
use crate::location::{LocationError, LocationProvider, PositionOptions, WatchHandle};
use crate::model::{
    Brand, BrandId, CompletionRecord, CompletionState, Coordinates, Customer, CustomerChoice,
    Evidence, OverrideRecord, ProximityProof, TaskId, VerificationResult, VisitDraft, VisitId,
    VisitKind, VisitSubmission, VisitSummary,
};
use crate::proximity;

type FixResult = core::result::Result<Coordinates, LocationError>;

/// A single-shot fix request handed out by [`VisitWorkflow::request_fix`].
#[must_use = "a fix request does nothing until resolved"]
pub struct FixRequest {
    generation: u64,
    provider: LocationProvider,
    options: PositionOptions,
    cancel: CancellationToken,
}

impl FixRequest {
    /// Wait for the platform to answer, time out, or be cancelled.
    pub async fn resolve(self) -> FixOutcome {
        let result = self
            .provider
            .current_position(&self.options, &self.cancel)
            .await;
        FixOutcome {
            generation: self.generation,
            result,
        }
    }
}

/// What a [`FixRequest`] resolved to. Pass it to [`VisitWorkflow::apply_fix`].
#[derive(Debug)]
pub struct FixOutcome {
    generation: u64,
    result: FixResult,
}

impl FixOutcome {
    pub fn result(&self) -> &FixResult {
        &self.result
    }
}

/// A continuous watch scoped to the location step.
struct Tracking {
    watch: WatchHandle,
    updates: mpsc::UnboundedReceiver<FixResult>,
}

/// Drives one visit from customer selection to completion.
pub struct VisitWorkflow<B> {
    session: VisitSession,
    stage: Stage,
    policy: WorkflowPolicy,
    location: LocationProvider,
    backend: B,

    /// Bumped whenever pending location work is invalidated.
    generation: u64,
    pending: Option<CancellationToken>,
    tracking: Option<Tracking>,
}

impl<B: VisitBackend> VisitWorkflow<B> {
    pub fn new(
        kind: VisitKind,
        policy: WorkflowPolicy,
        location: LocationProvider,
        backend: B,
    ) -> Self {
        let session = VisitSession::new(kind);
        info!(
            visit = %session.id,
            %kind,
            threshold_meters = policy.threshold_meters,
            "visit started"
        );
        Self {
            session,
            stage: Stage::CustomerSelection,
            policy,
            location,
            backend,
            generation: 0,
            pending: None,
            tracking: None,
        }
    }

    pub fn step(&self) -> WorkflowStep {
        self.stage.step()
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn session(&self) -> &VisitSession {
        &self.session
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    /// Progress so far. Elapsed time stops at completion.
    pub fn summary(&self) -> VisitSummary {
        let until = match &self.stage {
            Stage::Completion(record) => record.completed_at,
            _ => Timestamp::now(),
        };
        self.session.summary(until)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.is_some()
    }

    pub fn has_pending_fix(&self) -> bool {
        self.pending.is_some()
    }

    // Customer selection

    pub async fn search_customers(&self, query: &str) -> Result<Vec<Customer>> {
        self.require("customer search", WorkflowStep::CustomerSelection)?;
        Ok(self.backend.find_customers(query).await?)
    }

    pub fn select_customer(&mut self, customer: Customer) -> Result<()> {
        self.require("customer selection", WorkflowStep::CustomerSelection)?;
        debug!(visit = %self.session.id, customer = %customer.id, "customer selected");
        self.session.customer = CustomerDraft::Existing(customer);
        Ok(())
    }

    /// Start registering a customer that does not exist yet.
    pub fn register_new_customer(&mut self, name: impl Into<String>) -> Result<()> {
        self.require("customer registration", WorkflowStep::CustomerSelection)?;
        let name = name.into();
        debug!(visit = %self.session.id, name = %name, "new customer entered");
        self.session.customer = CustomerDraft::New(name);
        Ok(())
    }

    // Location verification

    /// Start a single-shot fix request, superseding any pending one.
    pub fn request_fix(&mut self) -> Result<FixRequest> {
        self.require("location refresh", WorkflowStep::LocationVerification)?;
        self.cancel_pending();

        let cancel = CancellationToken::new();
        self.pending = Some(cancel.clone());
        debug!(visit = %self.session.id, generation = self.generation, "fix requested");
        Ok(FixRequest {
            generation: self.generation,
            provider: self.location.clone(),
            options: self.policy.fix_options,
            cancel,
        })
    }

    /// Verify a resolved fix against the selected customer.
    ///
    /// Outcomes of superseded requests are rejected with
    /// [`WorkflowError::StaleFix`] and leave the session untouched.
    pub fn apply_fix(&mut self, outcome: FixOutcome) -> Result<VerificationResult> {
        if self.pending.is_none() || outcome.generation != self.generation {
            warn!(
                visit = %self.session.id,
                generation = outcome.generation,
                current = self.generation,
                "discarding fix from a superseded request"
            );
            return Err(WorkflowError::StaleFix);
        }
        self.pending = None;
        let fix = outcome.result?;
        self.verify_fix(fix)
    }

    /// Acquire a fix and verify it.
    pub async fn refresh_location(&mut self) -> Result<VerificationResult> {
        let request = self.request_fix()?;
        let outcome = request.resolve().await;
        self.apply_fix(outcome)
    }

    /// Record an override against the latest failed verification.
    pub fn record_override(&mut self, justification: &str) -> Result<OverrideRecord> {
        self.require("override", WorkflowStep::LocationVerification)?;
        let Some(latest) = self.current_verification() else {
            return Err(OverrideError::NotAvailable.into());
        };
        if latest.result.within_threshold || self.session.active_override.is_some() {
            return Err(OverrideError::NotAvailable.into());
        }

        let record = audit::record_override(justification, &latest.result)?;
        self.session.active_override = Some(record.clone());
        Ok(record)
    }

    /// Watch the position continuously while on the location step.
    ///
    /// Updates are verified as they are read with [`next_tracked_fix`].
    /// The watch is released when the machine leaves the step.
    ///
    /// [`next_tracked_fix`]: VisitWorkflow::next_tracked_fix
    pub fn start_tracking(&mut self) -> Result<()> {
        self.require("location tracking", WorkflowStep::LocationVerification)?;
        if self.tracking.is_some() {
            return Ok(());
        }

        let (tx, updates) = mpsc::unbounded_channel();
        let errors = tx.clone();
        let watch = self.location.watch_position(
            move |fix| {
                let _ = tx.send(Ok(fix));
            },
            move |e| {
                let _ = errors.send(Err(e));
            },
            &self.policy.watch_options,
        );
        info!(visit = %self.session.id, watch = watch.id().0, "location tracking started");
        self.tracking = Some(Tracking { watch, updates });
        Ok(())
    }

    pub fn stop_tracking(&mut self) {
        if let Some(tracking) = self.tracking.take() {
            tracking.watch.cancel();
            info!(visit = %self.session.id, "location tracking stopped");
        }
    }

    /// Wait for the next tracked update and verify it.
    ///
    /// Returns `None` when not tracking or when the watch has ended.
    pub async fn next_tracked_fix(&mut self) -> Option<Result<VerificationResult>> {
        let update = self.tracking.as_mut()?.updates.recv().await?;
        Some(
            update
                .map_err(WorkflowError::from)
                .and_then(|fix| self.verify_fix(fix)),
        )
    }

    // Task selection

    pub async fn list_brands(&self) -> Result<Vec<Brand>> {
        self.require("brand listing", WorkflowStep::TaskSelection)?;
        Ok(self.backend.list_brands().await?)
    }

    pub fn select_brand(&mut self, brand: Brand) -> Result<()> {
        self.require("brand selection", WorkflowStep::TaskSelection)?;
        if !self.session.selected_brands.iter().any(|b| b.id == brand.id) {
            debug!(visit = %self.session.id, brand = %brand.id, "brand selected");
            self.session.selected_brands.push(brand);
        }
        Ok(())
    }

    pub fn deselect_brand(&mut self, id: &BrandId) -> Result<()> {
        self.require("brand selection", WorkflowStep::TaskSelection)?;
        self.session.selected_brands.retain(|b| &b.id != id);
        Ok(())
    }

    // Task execution

    pub fn start_task(&mut self, id: &TaskId) -> Result<()> {
        self.require("task start", WorkflowStep::TaskExecution)?;
        let visit = self.session.id;
        let task = self
            .session
            .task_mut(id)
            .ok_or_else(|| WorkflowError::UnknownTask(id.clone()))?;
        match task.state {
            CompletionState::Completed => Err(WorkflowError::TaskAlreadyCompleted(id.clone())),
            CompletionState::InProgress => Ok(()),
            CompletionState::Pending => {
                task.state = CompletionState::InProgress;
                debug!(%visit, task = %id, kind = %task.kind, "task started");
                Ok(())
            }
        }
    }

    /// Mark a started task done.
    ///
    /// `units` is the item count for per-unit kinds. Every other kind
    /// counts once regardless. Board placements and photo captures need
    /// evidence attached first.
    pub fn complete_task(&mut self, id: &TaskId, units: u32) -> Result<()> {
        self.require("task completion", WorkflowStep::TaskExecution)?;
        if units == 0 {
            return Err(WorkflowError::validation(
                "a completed task needs at least one unit",
            ));
        }
        let visit = self.session.id;
        let task = self
            .session
            .task_mut(id)
            .ok_or_else(|| WorkflowError::UnknownTask(id.clone()))?;
        match task.state {
            CompletionState::Completed => {
                return Err(WorkflowError::TaskAlreadyCompleted(id.clone()));
            }
            CompletionState::Pending => return Err(WorkflowError::TaskNotStarted(id.clone())),
            CompletionState::InProgress => {}
        }
        if task.kind.needs_photo() && task.evidence.is_empty() {
            return Err(WorkflowError::validation(format!(
                "attach a photo before completing the {} task",
                task.kind
            )));
        }

        task.units = if task.kind.is_per_unit() { units } else { 1 };
        task.state = CompletionState::Completed;
        debug!(%visit, task = %id, kind = %task.kind, units = task.units, "task completed");
        Ok(())
    }

    pub fn attach_evidence(&mut self, id: &TaskId, evidence: Evidence) -> Result<()> {
        self.require("evidence capture", WorkflowStep::TaskExecution)?;
        let visit = self.session.id;
        let task = self
            .session
            .task_mut(id)
            .ok_or_else(|| WorkflowError::UnknownTask(id.clone()))?;
        debug!(
            %visit,
            task = %id,
            content_type = %evidence.content_type,
            bytes = evidence.bytes.len(),
            "evidence attached"
        );
        task.evidence.push(evidence);
        Ok(())
    }

    // Navigation

    /// Run the current step's gate and advance if it passes.
    ///
    /// Leaving task selection opens the visit on the backend. Leaving task
    /// execution submits it and computes the commission preview. A failed
    /// gate or backend call leaves the machine where it was.
    pub async fn next(&mut self) -> Result<WorkflowStep> {
        let from = self.step();
        let next = match &self.stage {
            Stage::CustomerSelection => Stage::LocationVerification {
                customer: self.customer_gate()?,
            },
            Stage::LocationVerification { customer } => Stage::TaskSelection {
                customer: customer.clone(),
                proof: self.location_gate()?,
            },
            Stage::TaskSelection { customer, proof } => {
                let (customer, proof) = (customer.clone(), proof.clone());
                let visit_id = self.open_visit(&customer, &proof).await?;
                Stage::TaskExecution {
                    customer,
                    proof,
                    visit_id,
                }
            }
            Stage::TaskExecution {
                customer,
                proof,
                visit_id,
            } => {
                let (customer, proof, visit_id) =
                    (customer.clone(), proof.clone(), visit_id.clone());
                Stage::Completion(Box::new(self.submit(customer, proof, visit_id).await?))
            }
            Stage::Completion(_) => return Err(WorkflowError::Completed),
        };

        if from == WorkflowStep::LocationVerification {
            self.release_location();
        }
        self.stage = next;
        info!(visit = %self.session.id, from = %from, to = %self.step(), "step advanced");
        Ok(self.step())
    }

    /// Move one step back. Captured data stays; location work is cancelled.
    pub fn back(&mut self) -> Result<WorkflowStep> {
        let prev = match &self.stage {
            Stage::CustomerSelection => return Ok(WorkflowStep::CustomerSelection),
            Stage::LocationVerification { .. } => Stage::CustomerSelection,
            Stage::TaskSelection { customer, .. } => Stage::LocationVerification {
                customer: customer.clone(),
            },
            Stage::TaskExecution {
                customer, proof, ..
            } => Stage::TaskSelection {
                customer: customer.clone(),
                proof: proof.clone(),
            },
            Stage::Completion(_) => return Err(WorkflowError::Completed),
        };

        self.release_location();
        let from = self.step();
        self.stage = prev;
        info!(visit = %self.session.id, from = %from, to = %self.step(), "step back");
        Ok(self.step())
    }

    /// Tear the workflow down, cancelling location work.
    pub fn abort(mut self) -> VisitSession {
        self.release_location();
        info!(visit = %self.session.id, step = %self.step(), "visit aborted");
        self.session
    }

    // Internals

    fn require(&self, action: &'static str, expected: WorkflowStep) -> Result<()> {
        let actual = self.step();
        if actual == expected {
            Ok(())
        } else if actual.is_terminal() {
            Err(WorkflowError::Completed)
        } else {
            Err(WorkflowError::WrongStep {
                action,
                expected,
                actual,
            })
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
        self.generation += 1;
    }

    fn release_location(&mut self) {
        self.cancel_pending();
        self.stop_tracking();
    }

    /// The latest fix, if it was verified against the customer now being
    /// verified.
    fn current_verification(&self) -> Option<&VerifiedFix> {
        let Stage::LocationVerification { customer } = &self.stage else {
            return None;
        };
        let against = VerifiedAgainst::of(customer);
        self.session
            .latest
            .as_ref()
            .filter(|latest| latest.against == against)
    }

    fn verify_fix(&mut self, fix: Coordinates) -> Result<VerificationResult> {
        let Stage::LocationVerification { customer } = &self.stage else {
            return Err(WorkflowError::WrongStep {
                action: "location verification",
                expected: WorkflowStep::LocationVerification,
                actual: self.step(),
            });
        };
        let against = VerifiedAgainst::of(customer);
        let target = match customer {
            CustomerChoice::Existing { location, .. } => *location,
            // A new customer is registered where the agent stands.
            CustomerChoice::New { .. } => fix.point(),
        };
        let result = proximity::verify(&fix, &target, self.policy.threshold_meters);

        let retarget = self
            .session
            .latest
            .as_ref()
            .is_some_and(|latest| latest.against != against);
        if (!self.policy.carry_override_forward || retarget)
            && let Some(record) = self.session.active_override.take()
        {
            warn!(
                visit = %self.session.id,
                distance_at_override_meters = record.distance_at_override_meters,
                "override superseded by a newer fix"
            );
            self.session.superseded_overrides.push(record);
        }

        self.session.fix_sequence += 1;
        debug!(
            visit = %self.session.id,
            sequence = self.session.fix_sequence,
            distance_meters = result.distance_meters,
            threshold_meters = result.threshold_meters,
            within_threshold = result.within_threshold,
            quality = ?result.quality_tier,
            "fix verified"
        );
        self.session.latest = Some(VerifiedFix {
            sequence: self.session.fix_sequence,
            fix,
            against,
            result,
        });
        Ok(result)
    }

    fn customer_gate(&self) -> Result<CustomerChoice> {
        match &self.session.customer {
            CustomerDraft::Unselected => Err(WorkflowError::validation(
                "select a customer or register a new one",
            )),
            CustomerDraft::Existing(customer) => {
                let Some(location) = customer.location else {
                    return Err(WorkflowError::validation(format!(
                        "{} has no registered location",
                        customer.name
                    )));
                };
                location.validate().map_err(|e| {
                    WorkflowError::validation(format!(
                        "{} has an invalid registered location: {e}",
                        customer.name
                    ))
                })?;
                Ok(CustomerChoice::Existing {
                    customer: customer.clone(),
                    location,
                })
            }
            CustomerDraft::New(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(WorkflowError::validation("enter the new customer's name"));
                }
                Ok(CustomerChoice::New {
                    name: name.to_string(),
                })
            }
        }
    }

    fn location_gate(&self) -> Result<ProximityProof> {
        let Some(latest) = self.current_verification() else {
            return Err(WorkflowError::validation(
                "verify your location at the customer",
            ));
        };

        if let Some(accuracy) = latest.fix.accuracy_meters
            && accuracy > self.policy.max_accuracy_meters
        {
            warn!(
                visit = %self.session.id,
                accuracy_meters = accuracy,
                max_meters = self.policy.max_accuracy_meters,
                "location gate rejected: poor accuracy"
            );
            return Err(WorkflowError::PoorAccuracy {
                accuracy_meters: accuracy,
                max_meters: self.policy.max_accuracy_meters,
            });
        }

        if latest.result.within_threshold {
            return Ok(ProximityProof::Verified {
                fix: latest.fix,
                result: latest.result,
            });
        }
        if let Some(record) = &self.session.active_override {
            return Ok(ProximityProof::Overridden {
                fix: latest.fix,
                result: latest.result,
                record: record.clone(),
            });
        }

        warn!(
            visit = %self.session.id,
            distance_meters = latest.result.distance_meters,
            threshold_meters = latest.result.threshold_meters,
            "location gate rejected: out of range"
        );
        Err(WorkflowError::OutOfRange {
            distance_meters: latest.result.distance_meters,
            threshold_meters: latest.result.threshold_meters,
        })
    }

    /// Open a visit for the selected brands.
    ///
    /// The open visit is reused only when it was created from an identical
    /// draft: same customer, same proof and same brand set. Anything else
    /// opens a new visit and drops the old task progress.
    async fn open_visit(
        &mut self,
        customer: &CustomerChoice,
        proof: &ProximityProof,
    ) -> Result<VisitId> {
        let brand_ids = self.session.selected_brand_ids();
        if brand_ids.is_empty() {
            return Err(WorkflowError::validation("select at least one brand"));
        }

        let draft = VisitDraft {
            session_id: self.session.id,
            kind: self.session.kind,
            customer: customer.clone(),
            proof: proof.clone(),
            brand_ids,
        };
        if let Some(visit) = &self.session.visit
            && self.session.opened_with.as_ref() == Some(&draft)
        {
            debug!(visit = %self.session.id, visit_id = %visit.visit_id, "reusing open visit");
            return Ok(visit.visit_id.clone());
        }

        let created = self.backend.create_visit(&draft).await?;
        if let Some(previous) = &self.session.visit {
            info!(
                visit = %self.session.id,
                previous = %previous.visit_id,
                "visit draft changed, replacing open visit"
            );
        }
        info!(
            visit = %self.session.id,
            visit_id = %created.visit_id,
            customer = %created.customer_id,
            tasks = created.tasks.len(),
            "visit created"
        );
        let visit_id = created.visit_id.clone();
        self.session.visit = Some(created);
        self.session.opened_with = Some(draft);
        Ok(visit_id)
    }

    async fn submit(
        &mut self,
        customer: CustomerChoice,
        proof: ProximityProof,
        visit_id: VisitId,
    ) -> Result<CompletionRecord> {
        let tasks = self.session.tasks().to_vec();
        let remaining = tasks.iter().filter(|t| t.is_blocking()).count();
        if remaining > 0 {
            return Err(WorkflowError::validation(format!(
                "complete all mandatory tasks ({remaining} remaining)"
            )));
        }

        let submission = VisitSubmission {
            session_id: self.session.id,
            visit_id,
            kind: self.session.kind,
            customer,
            proof,
            superseded_overrides: self.session.superseded_overrides.clone(),
            tasks,
            started_at: self.session.started_at,
        };
        let receipt = match self.backend.submit_visit(&submission).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(visit = %self.session.id, error = %e, "visit submission failed");
                return Err(e.into());
            }
        };

        let units = commission::completed_units(&submission.customer, &submission.tasks);
        let commission = self.policy.rates.breakdown(&units);
        info!(
            visit = %self.session.id,
            visit_id = %submission.visit_id,
            commission = %commission.total,
            currency = %commission.currency,
            "visit submitted"
        );
        self.session.commission = Some(commission.clone());

        let completed_at = Timestamp::now();
        Ok(CompletionRecord {
            summary: self.session.summary(completed_at),
            submission,
            receipt,
            commission,
            completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::backend::{MemoryBackend, TaskTemplate};
    use crate::commission::Amount;
    use crate::location::{PlatformError, ScriptedSource};
    use crate::model::{CustomerId, GeoPoint, TaskKind};

    const SHOP: (f64, f64) = (51.5007, -0.1246);

    fn fix(latitude: f64, longitude: f64, accuracy: f64) -> Coordinates {
        Coordinates::new(latitude, longitude, Some(accuracy), Timestamp::now()).unwrap()
    }

    /// At the shop door.
    fn near() -> Coordinates {
        fix(SHOP.0, SHOP.1, 5.0)
    }

    /// About 111 m north of the shop.
    fn far() -> Coordinates {
        fix(SHOP.0 + 0.001, SHOP.1, 5.0)
    }

    fn shop() -> Customer {
        Customer {
            id: CustomerId("c1".into()),
            name: "Corner Shop".into(),
            location: Some(GeoPoint::new(SHOP.0, SHOP.1).unwrap()),
        }
    }

    fn brand(id: &str, name: &str) -> Brand {
        Brand {
            id: BrandId(id.into()),
            name: name.into(),
        }
    }

    /// Two doors down from the shop.
    fn deli() -> Customer {
        Customer {
            id: CustomerId("c3".into()),
            name: "Deli Two".into(),
            location: Some(GeoPoint::new(SHOP.0 + 0.00002, SHOP.1).unwrap()),
        }
    }

    fn backend_with(templates: Vec<TaskTemplate>) -> MemoryBackend {
        MemoryBackend::new(
            vec![
                shop(),
                Customer {
                    id: CustomerId("c2".into()),
                    name: "Unmapped Kiosk".into(),
                    location: None,
                },
                deli(),
            ],
            vec![brand("b1", "Fizz"), brand("b2", "Crunch")],
            templates,
        )
    }

    fn backend() -> MemoryBackend {
        backend_with(vec![
            TaskTemplate {
                kind: TaskKind::Survey,
                is_mandatory: true,
            },
            TaskTemplate {
                kind: TaskKind::ProductDistribution,
                is_mandatory: false,
            },
        ])
    }

    fn workflow_with(
        source: &Arc<ScriptedSource>,
        policy: WorkflowPolicy,
    ) -> VisitWorkflow<MemoryBackend> {
        workflow_on(source, policy, backend())
    }

    fn workflow_on(
        source: &Arc<ScriptedSource>,
        policy: WorkflowPolicy,
        backend: MemoryBackend,
    ) -> VisitWorkflow<MemoryBackend> {
        VisitWorkflow::new(
            VisitKind::FieldMarketing,
            policy,
            LocationProvider::new(source.clone()),
            backend,
        )
    }

    fn workflow(source: &Arc<ScriptedSource>) -> VisitWorkflow<MemoryBackend> {
        workflow_with(source, WorkflowPolicy::for_kind(VisitKind::FieldMarketing))
    }

    async fn at_location(source: &Arc<ScriptedSource>) -> VisitWorkflow<MemoryBackend> {
        let mut wf = workflow(source);
        wf.select_customer(shop()).unwrap();
        wf.next().await.unwrap();
        wf
    }

    async fn at_tasks(source: &Arc<ScriptedSource>) -> VisitWorkflow<MemoryBackend> {
        source.push_fix(near());
        let mut wf = at_location(source).await;
        wf.refresh_location().await.unwrap();
        wf.next().await.unwrap();
        wf.select_brand(brand("b1", "Fizz")).unwrap();
        wf.next().await.unwrap();
        wf
    }

    fn task_id(wf: &VisitWorkflow<MemoryBackend>, kind: TaskKind) -> TaskId {
        wf.session()
            .tasks()
            .iter()
            .find(|t| t.kind == kind)
            .unwrap()
            .id
            .clone()
    }

    fn finish(wf: &mut VisitWorkflow<MemoryBackend>, id: &TaskId, units: u32) {
        wf.start_task(id).unwrap();
        wf.complete_task(id, units).unwrap();
    }

    /// Let spawned watch tasks run.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn customer_gate_needs_a_located_customer_or_a_name() {
        let source = Arc::new(ScriptedSource::new());
        let mut wf = workflow(&source);

        let err = wf.next().await.unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationFailed(_)));
        assert_eq!(err.recoveries(), &[Recovery::FixInput]);

        let unmapped = wf.search_customers("kiosk").await.unwrap();
        wf.select_customer(unmapped[0].clone()).unwrap();
        let err = wf.next().await.unwrap_err();
        assert!(err.to_string().contains("no registered location"));

        wf.register_new_customer("   ").unwrap();
        assert!(wf.next().await.is_err());
        assert_eq!(wf.step(), WorkflowStep::CustomerSelection);

        wf.register_new_customer("Kiosk 7").unwrap();
        assert_eq!(wf.next().await.unwrap(), WorkflowStep::LocationVerification);
    }

    #[tokio::test]
    async fn near_fix_passes_location_gate() {
        let source = Arc::new(ScriptedSource::with_fixes([near()]));
        let mut wf = at_location(&source).await;

        let err = wf.next().await.unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationFailed(_)));

        let result = wf.refresh_location().await.unwrap();
        assert!(result.within_threshold);
        assert_eq!(wf.next().await.unwrap(), WorkflowStep::TaskSelection);
        assert!(matches!(
            wf.stage().proof(),
            Some(ProximityProof::Verified { .. })
        ));
    }

    #[tokio::test]
    async fn override_path_requires_justification() {
        let source = Arc::new(ScriptedSource::with_fixes([far()]));
        let mut wf = at_location(&source).await;

        let result = wf.refresh_location().await.unwrap();
        assert!(!result.within_threshold);

        let err = wf.next().await.unwrap_err();
        assert!(matches!(err, WorkflowError::OutOfRange { .. }));
        assert!(err.recoveries().contains(&Recovery::OverrideWithJustification));

        assert!(matches!(
            wf.record_override("  "),
            Err(WorkflowError::Override(OverrideError::BlankJustification))
        ));
        assert!(wf.session().active_override().is_none());

        let record = wf.record_override(" Entrance moved to the side street ").unwrap();
        assert_eq!(record.justification, "Entrance moved to the side street");
        assert_eq!(record.distance_at_override_meters, result.distance_meters);

        assert_eq!(wf.next().await.unwrap(), WorkflowStep::TaskSelection);
        let proof = wf.stage().proof().unwrap();
        assert_eq!(proof.override_record(), Some(&record));
    }

    #[tokio::test]
    async fn override_unavailable_after_passing_fix() {
        let source = Arc::new(ScriptedSource::with_fixes([near()]));
        let mut wf = at_location(&source).await;

        assert!(matches!(
            wf.record_override("just in case"),
            Err(WorkflowError::Override(OverrideError::NotAvailable))
        ));
        wf.refresh_location().await.unwrap();
        assert!(matches!(
            wf.record_override("just in case"),
            Err(WorkflowError::Override(OverrideError::NotAvailable))
        ));
    }

    #[tokio::test]
    async fn newer_fix_supersedes_override() {
        let source = Arc::new(ScriptedSource::with_fixes([far(), far()]));
        let mut wf = at_location(&source).await;

        wf.refresh_location().await.unwrap();
        wf.record_override("Gate locked").unwrap();
        wf.refresh_location().await.unwrap();

        assert!(wf.session().active_override().is_none());
        assert_eq!(wf.session().superseded_overrides().len(), 1);
        assert!(matches!(
            wf.next().await,
            Err(WorkflowError::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn carried_override_survives_newer_fix() {
        let source = Arc::new(ScriptedSource::with_fixes([far(), far()]));
        let policy = WorkflowPolicy {
            carry_override_forward: true,
            ..WorkflowPolicy::for_kind(VisitKind::FieldMarketing)
        };
        let mut wf = workflow_with(&source, policy);
        wf.select_customer(shop()).unwrap();
        wf.next().await.unwrap();

        wf.refresh_location().await.unwrap();
        wf.record_override("Gate locked").unwrap();
        wf.refresh_location().await.unwrap();

        assert!(wf.session().superseded_overrides().is_empty());
        assert_eq!(wf.next().await.unwrap(), WorkflowStep::TaskSelection);
    }

    #[tokio::test]
    async fn poor_accuracy_blocks_even_with_override() {
        let source = Arc::new(ScriptedSource::with_fixes([fix(SHOP.0 + 0.001, SHOP.1, 250.0)]));
        let mut wf = at_location(&source).await;

        wf.refresh_location().await.unwrap();
        wf.record_override("Signal is bad here").unwrap();

        let err = wf.next().await.unwrap_err();
        assert!(matches!(err, WorkflowError::PoorAccuracy { .. }));
        assert_eq!(err.recoveries(), &[Recovery::RefreshLocation]);
    }

    #[tokio::test]
    async fn platform_error_leaves_machine_on_step() {
        let source = Arc::new(ScriptedSource::new());
        source.push_error(PlatformError::new(PlatformError::PERMISSION_DENIED, "denied"));
        let mut wf = at_location(&source).await;

        let err = wf.refresh_location().await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Location(LocationError::PermissionDenied { .. })
        ));
        assert_eq!(err.recoveries(), &[Recovery::EnableLocation]);
        assert_eq!(wf.step(), WorkflowStep::LocationVerification);
        assert!(!wf.has_pending_fix());
    }

    #[tokio::test]
    async fn fresh_request_makes_older_outcome_stale() {
        let source = Arc::new(ScriptedSource::with_fixes([far(), near()]));
        let mut wf = at_location(&source).await;

        let first = wf.request_fix().unwrap().resolve().await;
        assert!(first.result().is_ok());
        let second = wf.request_fix().unwrap();

        assert!(matches!(wf.apply_fix(first), Err(WorkflowError::StaleFix)));
        assert!(wf.session().latest_fix().is_none());

        let result = wf.apply_fix(second.resolve().await).unwrap();
        assert!(result.within_threshold);
    }

    #[tokio::test]
    async fn fresh_request_cancels_pending_one() {
        let source = Arc::new(ScriptedSource::new());
        source.push_hang();
        let mut wf = at_location(&source).await;

        let first = wf.request_fix().unwrap();
        let _second = wf.request_fix().unwrap();

        let outcome = first.resolve().await;
        assert!(matches!(outcome.result(), Err(LocationError::Cancelled)));
    }

    #[tokio::test]
    async fn back_makes_outcome_stale() {
        let source = Arc::new(ScriptedSource::with_fixes([near()]));
        let mut wf = at_location(&source).await;

        let outcome = wf.request_fix().unwrap().resolve().await;
        wf.back().unwrap();

        assert!(matches!(wf.apply_fix(outcome), Err(WorkflowError::StaleFix)));
        assert_eq!(wf.step(), WorkflowStep::CustomerSelection);
        assert!(wf.session().latest_fix().is_none());
    }

    #[tokio::test]
    async fn abort_cancels_in_flight_request() {
        let source = Arc::new(ScriptedSource::new());
        source.push_hang();
        let mut wf = at_location(&source).await;

        let request = wf.request_fix().unwrap();
        let session = wf.abort();
        assert!(session.latest_fix().is_none());

        let outcome = request.resolve().await;
        assert!(matches!(outcome.result(), Err(LocationError::Cancelled)));
    }

    #[tokio::test]
    async fn back_keeps_captured_data() {
        let source = Arc::new(ScriptedSource::with_fixes([near()]));
        let mut wf = at_location(&source).await;
        wf.refresh_location().await.unwrap();
        wf.next().await.unwrap();
        wf.select_brand(brand("b2", "Crunch")).unwrap();

        assert_eq!(wf.back().unwrap(), WorkflowStep::LocationVerification);
        assert!(wf.session().latest_fix().is_some());
        assert_eq!(wf.back().unwrap(), WorkflowStep::CustomerSelection);
        assert_eq!(wf.back().unwrap(), WorkflowStep::CustomerSelection);
        assert!(matches!(wf.session().customer(), CustomerDraft::Existing(c) if c.id == shop().id));

        wf.next().await.unwrap();
        assert_eq!(wf.next().await.unwrap(), WorkflowStep::TaskSelection);
        assert_eq!(wf.session().selected_brands().len(), 1);
    }

    #[tokio::test]
    async fn changed_customer_needs_fresh_fix() {
        let source = Arc::new(ScriptedSource::with_fixes([near()]));
        let mut wf = at_location(&source).await;
        wf.refresh_location().await.unwrap();

        wf.back().unwrap();
        wf.register_new_customer("Kiosk 7").unwrap();
        wf.next().await.unwrap();

        assert!(matches!(
            wf.next().await,
            Err(WorkflowError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn operations_are_scoped_to_their_step() {
        let source = Arc::new(ScriptedSource::new());
        let mut wf = workflow(&source);

        assert!(matches!(
            wf.select_brand(brand("b1", "Fizz")),
            Err(WorkflowError::WrongStep { .. })
        ));
        assert!(matches!(
            wf.request_fix(),
            Err(WorkflowError::WrongStep { .. })
        ));
        assert!(matches!(
            wf.complete_task(&TaskId("t".into()), 1),
            Err(WorkflowError::WrongStep { .. })
        ));
        assert!(matches!(
            wf.list_brands().await,
            Err(WorkflowError::WrongStep { .. })
        ));
    }

    #[tokio::test]
    async fn brand_gate_needs_a_selection() {
        let source = Arc::new(ScriptedSource::with_fixes([near()]));
        let mut wf = at_location(&source).await;
        wf.refresh_location().await.unwrap();
        wf.next().await.unwrap();

        let brands = wf.list_brands().await.unwrap();
        assert_eq!(brands.len(), 2);
        assert!(matches!(
            wf.next().await,
            Err(WorkflowError::ValidationFailed(_))
        ));

        wf.select_brand(brands[0].clone()).unwrap();
        wf.deselect_brand(&brands[0].id).unwrap();
        assert!(wf.next().await.is_err());
        assert!(wf.backend().drafts().is_empty());
    }

    #[tokio::test]
    async fn mandatory_task_gates_completion() {
        let source = Arc::new(ScriptedSource::new());
        let mut wf = at_tasks(&source).await;
        let survey = task_id(&wf, TaskKind::Survey);

        assert!(matches!(
            wf.next().await,
            Err(WorkflowError::ValidationFailed(reason)) if reason.contains("mandatory")
        ));
        assert_eq!(wf.step(), WorkflowStep::TaskExecution);

        finish(&mut wf, &survey, 1);
        assert_eq!(wf.next().await.unwrap(), WorkflowStep::Completion);
    }

    #[tokio::test]
    async fn task_operations_reject_bad_ids_and_repeats() {
        let source = Arc::new(ScriptedSource::new());
        let mut wf = at_tasks(&source).await;
        let survey = task_id(&wf, TaskKind::Survey);

        assert!(matches!(
            wf.start_task(&TaskId("missing".into())),
            Err(WorkflowError::UnknownTask(_))
        ));
        assert!(matches!(
            wf.complete_task(&survey, 0),
            Err(WorkflowError::ValidationFailed(_))
        ));
        finish(&mut wf, &survey, 1);
        assert!(matches!(
            wf.complete_task(&survey, 1),
            Err(WorkflowError::TaskAlreadyCompleted(_))
        ));
        assert!(matches!(
            wf.start_task(&survey),
            Err(WorkflowError::TaskAlreadyCompleted(_))
        ));

        wf.attach_evidence(
            &survey,
            Evidence {
                content_type: "image/jpeg".into(),
                bytes: vec![0xff, 0xd8],
                captured_at: Timestamp::now(),
            },
        )
        .unwrap();
        assert_eq!(wf.session().tasks()[0].evidence.len(), 1);
    }

    #[tokio::test]
    async fn completion_computes_commission_once() {
        let source = Arc::new(ScriptedSource::new());
        let mut wf = at_tasks(&source).await;
        let survey = task_id(&wf, TaskKind::Survey);
        let distribution = task_id(&wf, TaskKind::ProductDistribution);

        finish(&mut wf, &survey, 3);
        finish(&mut wf, &distribution, 12);
        wf.next().await.unwrap();

        let Stage::Completion(record) = wf.stage() else {
            panic!("expected completion");
        };
        // Survey counts once; distribution pays per item.
        assert_eq!(record.commission.total, Amount::from_cents(500 + 600));
        assert_eq!(wf.session().commission(), Some(&record.commission));
        assert!(record.receipt.commission_id.is_some());
        assert_eq!(wf.backend().submissions().len(), 1);

        assert!(matches!(wf.next().await, Err(WorkflowError::Completed)));
        assert!(matches!(wf.back(), Err(WorkflowError::Completed)));
        assert!(matches!(
            wf.start_task(&survey),
            Err(WorkflowError::Completed)
        ));
    }

    #[tokio::test]
    async fn failed_submission_can_be_retried() {
        let source = Arc::new(ScriptedSource::new());
        let mut wf = at_tasks(&source).await;
        let survey = task_id(&wf, TaskKind::Survey);
        finish(&mut wf, &survey, 1);

        wf.backend().fail_next_submission();
        let err = wf.next().await.unwrap_err();
        assert!(matches!(err, WorkflowError::Backend(_)));
        assert_eq!(err.recoveries(), &[Recovery::Retry]);
        assert_eq!(wf.step(), WorkflowStep::TaskExecution);
        assert!(wf.session().tasks()[0].is_completed());
        assert!(wf.session().commission().is_none());

        assert_eq!(wf.next().await.unwrap(), WorkflowStep::Completion);
        assert_eq!(wf.backend().submissions().len(), 1);
    }

    #[tokio::test]
    async fn unchanged_brands_reuse_visit() {
        let source = Arc::new(ScriptedSource::new());
        let mut wf = at_tasks(&source).await;
        let visit_id = wf.session().visit().unwrap().visit_id.clone();
        let survey = task_id(&wf, TaskKind::Survey);
        finish(&mut wf, &survey, 1);

        wf.back().unwrap();
        wf.next().await.unwrap();
        assert_eq!(wf.session().visit().unwrap().visit_id, visit_id);
        assert_eq!(wf.backend().drafts().len(), 1);
        assert!(wf.session().tasks()[0].is_completed());

        wf.back().unwrap();
        wf.select_brand(brand("b2", "Crunch")).unwrap();
        wf.next().await.unwrap();
        assert_ne!(wf.session().visit().unwrap().visit_id, visit_id);
        assert_eq!(wf.backend().drafts().len(), 2);
        assert_eq!(wf.session().tasks().len(), 4);
    }

    #[tokio::test]
    async fn new_customer_is_registered_and_paid_for() {
        let source = Arc::new(ScriptedSource::with_fixes([fix(-26.2041, 28.0473, 8.0)]));
        let mut wf = workflow(&source);
        wf.register_new_customer(" Kiosk 7 ").unwrap();
        wf.next().await.unwrap();

        let result = wf.refresh_location().await.unwrap();
        assert_eq!(result.distance_meters, 0.0);
        wf.next().await.unwrap();
        wf.select_brand(brand("b1", "Fizz")).unwrap();
        wf.next().await.unwrap();

        let registered = wf.backend().find_customers("kiosk 7").await.unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(
            registered[0].location,
            Some(GeoPoint::new(-26.2041, 28.0473).unwrap())
        );

        let survey = task_id(&wf, TaskKind::Survey);
        finish(&mut wf, &survey, 1);
        wf.next().await.unwrap();

        let commission = wf.session().commission().unwrap();
        assert_eq!(commission.total, Amount::from_cents(500 + 1500));
        assert!(commission
            .lines
            .iter()
            .any(|l| l.kind == TaskKind::CustomerRegistration));
    }

    #[tokio::test]
    async fn submission_carries_superseded_overrides() {
        let source = Arc::new(ScriptedSource::with_fixes([far(), near()]));
        let mut wf = at_location(&source).await;
        wf.refresh_location().await.unwrap();
        wf.record_override("Gate locked").unwrap();
        wf.refresh_location().await.unwrap();
        wf.next().await.unwrap();
        wf.select_brand(brand("b1", "Fizz")).unwrap();
        wf.next().await.unwrap();
        let survey = task_id(&wf, TaskKind::Survey);
        finish(&mut wf, &survey, 1);
        wf.next().await.unwrap();

        let submission = &wf.backend().submissions()[0];
        assert_eq!(submission.superseded_overrides.len(), 1);
        assert!(matches!(submission.proof, ProximityProof::Verified { .. }));
    }

    #[tokio::test]
    async fn tracked_fixes_are_verified_until_step_exit() {
        let source = Arc::new(ScriptedSource::new());
        let mut wf = at_location(&source).await;
        wf.start_tracking().unwrap();
        assert_eq!(source.active_watches(), 1);

        source.emit(Ok(far()));
        let result = wf.next_tracked_fix().await.unwrap().unwrap();
        assert!(!result.within_threshold);

        source.emit(Ok(near()));
        let result = wf.next_tracked_fix().await.unwrap().unwrap();
        assert!(result.within_threshold);
        assert_eq!(wf.session().latest_fix().unwrap().sequence, 2);

        wf.next().await.unwrap();
        assert!(!wf.is_tracking());
        assert_eq!(source.active_watches(), 0);
        assert!(wf.next_tracked_fix().await.is_none());
    }

    #[tokio::test]
    async fn back_releases_tracking_watch() {
        let source = Arc::new(ScriptedSource::new());
        let mut wf = at_location(&source).await;
        wf.start_tracking().unwrap();

        wf.back().unwrap();
        settle().await;
        assert!(!wf.is_tracking());
        assert_eq!(source.active_watches(), 0);
        assert_eq!(source.emit(Ok(near())), 0);
    }

    #[tokio::test]
    async fn changing_customer_opens_a_new_visit() {
        let source = Arc::new(ScriptedSource::new());
        let mut wf = at_tasks(&source).await;
        let first = wf.session().visit().unwrap().visit_id.clone();
        let survey = task_id(&wf, TaskKind::Survey);
        finish(&mut wf, &survey, 1);

        for _ in 0..3 {
            wf.back().unwrap();
        }
        wf.select_customer(deli()).unwrap();
        wf.next().await.unwrap();
        source.push_fix(near());
        wf.refresh_location().await.unwrap();
        wf.next().await.unwrap();
        wf.next().await.unwrap();

        let drafts = wf.backend().drafts();
        assert_eq!(drafts.len(), 2);
        assert!(matches!(
            &drafts[1].customer,
            CustomerChoice::Existing { customer, .. } if customer.id == deli().id
        ));
        let second = wf.session().visit().unwrap().visit_id.clone();
        assert_ne!(second, first);
        assert!(wf.session().tasks().iter().all(|t| !t.is_completed()));

        let survey = task_id(&wf, TaskKind::Survey);
        finish(&mut wf, &survey, 1);
        wf.next().await.unwrap();
        let submission = &wf.backend().submissions()[0];
        assert_eq!(submission.visit_id, second);
        assert_eq!(submission.customer, drafts[1].customer);
    }

    #[tokio::test]
    async fn newer_fix_opens_a_new_visit() {
        let source = Arc::new(ScriptedSource::new());
        let mut wf = at_tasks(&source).await;

        wf.back().unwrap();
        wf.back().unwrap();
        source.push_fix(fix(SHOP.0 + 0.00001, SHOP.1, 4.0));
        wf.refresh_location().await.unwrap();
        wf.next().await.unwrap();
        wf.next().await.unwrap();

        let drafts = wf.backend().drafts();
        assert_eq!(drafts.len(), 2);
        assert_ne!(drafts[0].proof, drafts[1].proof);
    }

    #[tokio::test]
    async fn new_customer_is_registered_once_when_brands_change() {
        let source = Arc::new(ScriptedSource::with_fixes([fix(-26.2041, 28.0473, 8.0)]));
        let mut wf = workflow(&source);
        wf.register_new_customer("Kiosk 7").unwrap();
        wf.next().await.unwrap();
        wf.refresh_location().await.unwrap();
        wf.next().await.unwrap();
        wf.select_brand(brand("b1", "Fizz")).unwrap();
        wf.next().await.unwrap();
        let first = wf.session().visit().unwrap().customer_id.clone();

        wf.back().unwrap();
        wf.select_brand(brand("b2", "Crunch")).unwrap();
        wf.next().await.unwrap();

        assert_eq!(wf.backend().drafts().len(), 2);
        assert_eq!(wf.session().visit().unwrap().customer_id, first);
        let registered = wf.backend().find_customers("kiosk 7").await.unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].id, first);
    }

    #[tokio::test]
    async fn tasks_must_be_started_and_photos_attached() {
        let source = Arc::new(ScriptedSource::with_fixes([near()]));
        let backend = backend_with(vec![TaskTemplate {
            kind: TaskKind::PhotoCapture,
            is_mandatory: true,
        }]);
        let mut wf = workflow_on(
            &source,
            WorkflowPolicy::for_kind(VisitKind::FieldMarketing),
            backend,
        );
        wf.select_customer(shop()).unwrap();
        wf.next().await.unwrap();
        wf.refresh_location().await.unwrap();
        wf.next().await.unwrap();
        wf.select_brand(brand("b1", "Fizz")).unwrap();
        wf.next().await.unwrap();
        let photo = task_id(&wf, TaskKind::PhotoCapture);

        let err = wf.complete_task(&photo, 1).unwrap_err();
        assert!(matches!(err, WorkflowError::TaskNotStarted(_)));
        assert_eq!(err.recoveries(), &[Recovery::FixInput]);

        wf.start_task(&photo).unwrap();
        assert!(matches!(
            wf.complete_task(&photo, 1),
            Err(WorkflowError::ValidationFailed(reason)) if reason.contains("attach a photo")
        ));
        assert!(matches!(
            wf.next().await,
            Err(WorkflowError::ValidationFailed(_))
        ));

        wf.attach_evidence(
            &photo,
            Evidence {
                content_type: "image/jpeg".into(),
                bytes: vec![0xff, 0xd8],
                captured_at: Timestamp::now(),
            },
        )
        .unwrap();
        wf.complete_task(&photo, 1).unwrap();
        assert_eq!(wf.next().await.unwrap(), WorkflowStep::Completion);
    }

    #[tokio::test]
    async fn summary_tracks_task_progress() {
        let source = Arc::new(ScriptedSource::new());
        let mut wf = at_tasks(&source).await;

        let summary = wf.summary();
        assert_eq!(summary.total_tasks, 2);
        assert_eq!(summary.completed_tasks, 0);
        assert_eq!(summary.mandatory_tasks, 1);
        assert_eq!(summary.completion_percent, 0);

        let survey = task_id(&wf, TaskKind::Survey);
        finish(&mut wf, &survey, 1);
        assert_eq!(wf.summary().completion_percent, 50);
        assert_eq!(wf.summary().completed_mandatory, 1);

        wf.next().await.unwrap();
        let Stage::Completion(record) = wf.stage() else {
            panic!("expected completion");
        };
        assert_eq!(record.summary, wf.summary());
    }
}
