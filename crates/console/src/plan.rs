//! Sequential multi-step runs described by a TOML plan file.
//!
//! ```toml
//! continue_on_failure = false
//!
//! [[steps]]
//! tool = "service.restart"
//! target = "web-01"
//! arguments = { service = "nginx" }
//! ```

use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::execution::{ExecutionRequest, ExecutionSnapshot, ExecutionStatus, LifecycleCoordinator};

/// Subscriber key plan steps run under.
pub const PLAN_KEY: &str = "plan";

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Plan {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub continue_on_failure: bool,
    pub steps: Vec<PlanStep>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PlanStep {
    pub tool: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Default::default())
}

impl PlanStep {
    fn request(&self) -> ExecutionRequest {
        ExecutionRequest {
            tool_name: self.tool.clone(),
            arguments: self.arguments.clone(),
            target: self.target.clone(),
        }
    }
}

pub fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    parse_plan(&raw).with_context(|| format!("invalid plan {}", path.display()))
}

pub fn parse_plan(raw: &str) -> anyhow::Result<Plan> {
    let plan: Plan = toml::from_str(raw).context("failed to parse plan")?;
    if plan.steps.is_empty() {
        bail!("plan must include at least one step");
    }
    for (index, step) in plan.steps.iter().enumerate() {
        if step.tool.trim().is_empty() {
            bail!("step {} has an empty tool name", index + 1);
        }
        if !step.arguments.is_object() {
            bail!("step {} arguments must be a table", index + 1);
        }
    }
    Ok(plan)
}

/// A snapshot relayed from step `step` (zero-based).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepSnapshot {
    pub step: usize,
    pub snapshot: ExecutionSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: usize,
    pub tool: String,
    pub execution_id: Option<String>,
    /// Last status seen; `None` if the step was cancelled before any snapshot.
    pub status: Option<ExecutionStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlanReport {
    pub steps: Vec<StepOutcome>,
    pub skipped: usize,
    pub cancelled: bool,
}

impl PlanReport {
    pub fn succeeded(&self) -> bool {
        !self.cancelled
            && self.skipped == 0
            && self
                .steps
                .iter()
                .all(|step| step.status == Some(ExecutionStatus::Success))
    }
}

/// Runs the steps one after another through `coordinator`, handing every
/// snapshot to `on_snapshot`. Stops after the first step that does not end in
/// `SUCCESS` unless the plan says to continue, and stops at once when
/// `cancel` fires.
pub async fn run_plan<F>(
    coordinator: &LifecycleCoordinator,
    plan: &Plan,
    cancel: &CancellationToken,
    mut on_snapshot: F,
) -> PlanReport
where
    F: FnMut(&StepSnapshot),
{
    let mut report = PlanReport::default();
    info!(
        event = "plan.start",
        name = plan.name.as_deref().unwrap_or("-"),
        steps = plan.steps.len(),
        "running plan"
    );
    for (index, step) in plan.steps.iter().enumerate() {
        let mut subscription = coordinator.track(PLAN_KEY, step.request()).await;
        let mut outcome = StepOutcome {
            step: index,
            tool: step.tool.clone(),
            execution_id: None,
            status: None,
        };
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                next = subscription.next() => next,
            };
            let Some(snapshot) = next else { break };
            outcome.execution_id = Some(snapshot.id.clone());
            outcome.status = Some(snapshot.status);
            on_snapshot(&StepSnapshot {
                step: index,
                snapshot,
            });
        }

        let succeeded = outcome.status == Some(ExecutionStatus::Success);
        report.steps.push(outcome);
        if report.cancelled {
            coordinator.stop(PLAN_KEY).await;
            warn!(event = "plan.cancelled", step = index, "plan cancelled");
            report.skipped = plan.steps.len() - index - 1;
            break;
        }
        if !succeeded && !plan.continue_on_failure {
            warn!(event = "plan.step_failed", step = index, tool = %step.tool, "plan stopped");
            report.skipped = plan.steps.len() - index - 1;
            break;
        }
    }
    info!(
        event = "plan.finished",
        succeeded = report.succeeded(),
        ran = report.steps.len(),
        skipped = report.skipped,
        "plan finished"
    );
    report
}
