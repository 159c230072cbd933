//! `fleetguard submit-plan` — submit an `ActionPlan` read from a JSON file
//! against a fresh in-memory controller and print the resulting
//! `PlanResult` as JSON.
//!
//! No deployment/workload/cluster fixtures are seeded here: this command
//! exercises policy evaluation end-to-end, but dispatch against an unknown
//! target fails per-decision (`"no deployment registered for target"`)
//! rather than against a real cluster. Use `demo` to see a full round trip.

use std::path::Path;

use anyhow::Context;
use fleetguard_config::ControllerConfig;
use fleetguard_core::api::ControllerApi;
use fleetguard_core::plan::ActionPlan;

use crate::harness;

pub async fn run(config: ControllerConfig, path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading plan file {}", path.display()))?;
    let plan: ActionPlan = serde_json::from_str(&text).with_context(|| "parsing ActionPlan JSON")?;

    let harness = harness::build(config);
    let result = harness.api.submit_action_plan(plan).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
