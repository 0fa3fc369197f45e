//! In-memory backend for tests and scripted replays.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BackendError, Result, VisitBackend};
use crate::model::{
    Brand, CreatedVisit, Customer, CustomerChoice, CustomerId, SubmissionReceipt, Task, TaskId,
    TaskKind, VisitDraft, VisitId, VisitSubmission,
};

/// A task the backend creates for every selected brand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTemplate {
    pub kind: TaskKind,
    #[serde(default)]
    pub is_mandatory: bool,
}

#[derive(Default)]
struct State {
    customers: Vec<Customer>,
    brands: Vec<Brand>,
    templates: Vec<TaskTemplate>,
    drafts: Vec<VisitDraft>,

    /// Customer registered by each session.
    registrations: HashMap<Uuid, CustomerId>,
    submissions: Vec<VisitSubmission>,
    fail_next_submission: bool,
}

/// Holds customers, brands and task templates in memory and records every
/// visit it is asked to create or persist.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new(customers: Vec<Customer>, brands: Vec<Brand>, templates: Vec<TaskTemplate>) -> Self {
        Self {
            state: Mutex::new(State {
                customers,
                brands,
                templates,
                ..State::default()
            }),
        }
    }

    /// Make the next submission fail as if the network dropped.
    pub fn fail_next_submission(&self) {
        self.state().fail_next_submission = true;
    }

    pub fn drafts(&self) -> Vec<VisitDraft> {
        self.state().drafts.clone()
    }

    pub fn submissions(&self) -> Vec<VisitSubmission> {
        self.state().submissions.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create(&self, draft: &VisitDraft) -> Result<CreatedVisit> {
        let mut state = self.state();
        for id in &draft.brand_ids {
            if !state.brands.iter().any(|b| &b.id == id) {
                return Err(BackendError::Rejected(format!("unknown brand: {id}")));
            }
        }

        let customer_id = match &draft.customer {
            CustomerChoice::Existing { customer, .. } => customer.id.clone(),
            CustomerChoice::New { name } => {
                let location = Some(draft.proof.fix().point());
                let State {
                    customers,
                    registrations,
                    ..
                } = &mut *state;
                let registered = registrations
                    .get(&draft.session_id)
                    .and_then(|id| customers.iter_mut().find(|c| &c.id == id));
                if let Some(customer) = registered {
                    customer.name.clone_from(name);
                    customer.location = location;
                    customer.id.clone()
                } else {
                    let id = CustomerId(Uuid::new_v4().to_string());
                    customers.push(Customer {
                        id: id.clone(),
                        name: name.clone(),
                        location,
                    });
                    registrations.insert(draft.session_id, id.clone());
                    id
                }
            }
        };

        let visit_id = VisitId(Uuid::new_v4().to_string());
        let mut tasks = Vec::new();
        for brand in &draft.brand_ids {
            for template in &state.templates {
                let id = TaskId(format!("{visit_id}-{}", tasks.len() + 1));
                tasks.push(Task::pending(
                    id,
                    template.kind,
                    Some(brand.clone()),
                    template.is_mandatory,
                ));
            }
        }

        state.drafts.push(draft.clone());
        Ok(CreatedVisit {
            visit_id,
            customer_id,
            brand_ids: draft.brand_ids.clone(),
            tasks,
        })
    }

    fn submit(&self, submission: &VisitSubmission) -> Result<SubmissionReceipt> {
        let mut state = self.state();
        if state.fail_next_submission {
            state.fail_next_submission = false;
            return Err(BackendError::Unreachable("connection reset".to_string()));
        }
        state.submissions.push(submission.clone());
        Ok(SubmissionReceipt {
            visit_id: submission.visit_id.clone(),
            commission_id: Some(Uuid::new_v4().to_string()),
        })
    }
}

impl VisitBackend for MemoryBackend {
    async fn find_customers(&self, query: &str) -> Result<Vec<Customer>> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .state()
            .customers
            .iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn list_brands(&self) -> Result<Vec<Brand>> {
        Ok(self.state().brands.clone())
    }

    async fn create_visit(&self, draft: &VisitDraft) -> Result<CreatedVisit> {
        self.create(draft)
    }

    async fn submit_visit(&self, submission: &VisitSubmission) -> Result<SubmissionReceipt> {
        self.submit(submission)
    }
}
