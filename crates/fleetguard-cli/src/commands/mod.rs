pub mod demo;
pub mod start_canary;
pub mod submit_plan;
pub mod validate;

use std::path::Path;

use anyhow::Context;
use fleetguard_config::ControllerConfig;

/// Load and validate the controller configuration, falling back to
/// `ControllerConfig::default()` when no path was given (§6: every section
/// is optional, the whole document is optional too for this CLI).
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ControllerConfig> {
    let Some(path) = path else {
        return Ok(ControllerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config = fleetguard_config::parse_controller_config(&text)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(config)
}
