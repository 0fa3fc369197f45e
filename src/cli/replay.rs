//! Scripted end-to-end visits.
//!
//! A scenario seeds the in-memory backend, queues the fixes the device will
//! report, and says what the agent does at each step:
//!
//! ```json
//! {
//!   "kind": "field-marketing",
//!   "customers": [{ "id": "c1", "name": "Corner Shop",
//!                   "location": { "latitude": 51.5007, "longitude": -0.1246 } }],
//!   "brands": [{ "id": "b1", "name": "Fizz" }],
//!   "taskTemplates": [{ "kind": "survey", "isMandatory": true }],
//!   "customer": { "kind": "existing", "id": "c1" },
//!   "fixes": [{ "latitude": 51.50072, "longitude": -0.12462, "accuracyMeters": 6 }],
//!   "overrideJustification": null,
//!   "selectBrands": ["b1"],
//!   "units": [{ "kind": "product-distribution", "units": 24 }],
//!   "photo": "shelf.jpg"
//! }
//! ```
//!
//! Fixes are requested in order until one is within the threshold. If none
//! is and a justification is given, an override is recorded. Every task is
//! started and completed; `photo` is attached to the tasks that need one
//! and is resolved against the scenario's directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use jiff::Timestamp;
use serde::Deserialize;

use visitgate::backend::{MemoryBackend, TaskTemplate};
use visitgate::config::Config;
use visitgate::location::{LocationProvider, ScriptedSource};
use visitgate::model::{
    Brand, BrandId, CompletionRecord, Coordinates, Customer, CustomerId, Evidence, TaskId,
    TaskKind, VisitKind,
};
use visitgate::workflow::{Stage, VisitWorkflow, WorkflowError, WorkflowPolicy, WorkflowStep};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Scenario {
    #[serde(default = "default_kind")]
    kind: VisitKind,
    #[serde(default)]
    customers: Vec<Customer>,
    #[serde(default)]
    brands: Vec<Brand>,
    #[serde(default)]
    task_templates: Vec<TaskTemplate>,
    customer: ScenarioCustomer,
    #[serde(default)]
    fixes: Vec<ScenarioFix>,
    #[serde(default)]
    override_justification: Option<String>,
    select_brands: Vec<BrandId>,

    /// Units recorded for each task of a kind. Missing kinds record one.
    #[serde(default)]
    units: Vec<ScenarioUnits>,

    /// Image attached to board-placement and photo-capture tasks.
    #[serde(default)]
    photo: Option<PathBuf>,
}

fn default_kind() -> VisitKind {
    VisitKind::FieldMarketing
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum ScenarioCustomer {
    Existing { id: CustomerId },
    New { name: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioFix {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy_meters: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ScenarioUnits {
    kind: TaskKind,
    units: u32,
}

/// Load a scenario file and drive it to completion.
pub(super) fn run(path: &Path, config: &Config) -> Result<CompletionRecord, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let mut scenario: Scenario = serde_json::from_str(&contents)
        .map_err(|e| format!("invalid scenario {}: {e}", path.display()))?;
    if let Some(photo) = scenario.photo.take() {
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        scenario.photo = Some(base.join(photo));
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;
    runtime.block_on(drive(scenario, config))
}

fn load_photo(path: &Path) -> Result<Evidence, String> {
    let bytes = fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    };
    Ok(Evidence {
        content_type: content_type.to_string(),
        bytes,
        captured_at: Timestamp::now(),
    })
}

fn at(step: WorkflowStep) -> impl Fn(WorkflowError) -> String {
    move |e| format!("{step}: {e}")
}

pub(super) async fn drive(scenario: Scenario, config: &Config) -> Result<CompletionRecord, String> {
    let source = Arc::new(ScriptedSource::new());
    for f in &scenario.fixes {
        let fix = Coordinates::new(f.latitude, f.longitude, f.accuracy_meters, Timestamp::now())
            .map_err(|e| format!("invalid scripted fix: {e}"))?;
        source.push_fix(fix);
    }

    let backend = MemoryBackend::new(scenario.customers, scenario.brands, scenario.task_templates);
    let policy = WorkflowPolicy::from_config(config, scenario.kind);
    let mut wf = VisitWorkflow::new(
        scenario.kind,
        policy,
        LocationProvider::new(source),
        backend,
    );

    let step = WorkflowStep::CustomerSelection;
    match scenario.customer {
        ScenarioCustomer::Existing { id } => {
            let customer = wf
                .search_customers("")
                .await
                .map_err(at(step))?
                .into_iter()
                .find(|c| c.id == id)
                .ok_or_else(|| format!("customer {id} is not in the scenario"))?;
            wf.select_customer(customer).map_err(at(step))?;
        }
        ScenarioCustomer::New { name } => wf.register_new_customer(name).map_err(at(step))?,
    }
    wf.next().await.map_err(at(step))?;

    let step = WorkflowStep::LocationVerification;
    let mut within = false;
    for _ in 0..scenario.fixes.len() {
        if wf.refresh_location().await.map_err(at(step))?.within_threshold {
            within = true;
            break;
        }
    }
    if !within && let Some(justification) = &scenario.override_justification {
        wf.record_override(justification).map_err(at(step))?;
    }
    wf.next().await.map_err(at(step))?;

    let step = WorkflowStep::TaskSelection;
    let brands = wf.list_brands().await.map_err(at(step))?;
    for id in &scenario.select_brands {
        let brand = brands
            .iter()
            .find(|b| &b.id == id)
            .cloned()
            .ok_or_else(|| format!("brand {id} is not in the scenario"))?;
        wf.select_brand(brand).map_err(at(step))?;
    }
    wf.next().await.map_err(at(step))?;

    let step = WorkflowStep::TaskExecution;
    let tasks: Vec<(TaskId, TaskKind)> = wf
        .session()
        .tasks()
        .iter()
        .map(|t| (t.id.clone(), t.kind))
        .collect();
    let photo = scenario.photo.as_deref().map(load_photo).transpose()?;
    for (id, kind) in tasks {
        let units = scenario
            .units
            .iter()
            .find(|u| u.kind == kind)
            .map_or(1, |u| u.units);
        wf.start_task(&id).map_err(at(step))?;
        if kind.needs_photo()
            && let Some(photo) = &photo
        {
            wf.attach_evidence(&id, photo.clone()).map_err(at(step))?;
        }
        wf.complete_task(&id, units).map_err(at(step))?;
    }
    wf.next().await.map_err(at(step))?;

    match wf.stage() {
        Stage::Completion(record) => Ok(record.as_ref().clone()),
        stage => Err(format!("visit stopped at {}", stage.step())),
    }
}
