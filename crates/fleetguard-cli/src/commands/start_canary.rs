//! `fleetguard start-canary` — start a canary rollout from a JSON-encoded
//! `StartCanaryRequest` against a fresh in-memory controller, streaming
//! events until the rollout reaches a terminal phase.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use fleetguard_config::ControllerConfig;
use fleetguard_core::api::{ControllerApi, StartCanaryRequest};

use crate::harness;

pub async fn run(config: ControllerConfig, path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading canary request file {}", path.display()))?;
    let request: StartCanaryRequest =
        serde_json::from_str(&text).with_context(|| "parsing StartCanaryRequest JSON")?;

    let harness = harness::build(config);
    let mut events_rx = harness.events.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            println!("{}", serde_json::to_string(&event).unwrap_or_default());
        }
    });

    let canary_id = harness.api.start_canary(request).await?;
    loop {
        let state = harness.api.get_canary_status(canary_id).await?;
        if state.phase.is_terminal() {
            println!("final phase: {}", state.phase);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    Ok(())
}
