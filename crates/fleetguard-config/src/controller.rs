//! The controller's single configuration record (spec §6 options table).

use std::collections::HashMap;
use std::str::FromStr;

use kdl::KdlDocument;
use serde::{Deserialize, Serialize};

use fleetguard_core::api::CanaryConfig;
use fleetguard_core::plan::PlanMode;
use fleetguard_core::rollback::RollbackConfig;
use fleetguard_core::workload::GpuSku;

use crate::kdl_util::{arg_bool, arg_f64, arg_str, arg_u32, arg_u64, child, children_named};
use crate::{ConfigError, ConfigResult};

/// Per-resource cost rates consulted by the `cost_ceiling` policy rule
/// (§4.3). An empty table means `cost_ceiling` never violates (§6 default).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceTable {
    pub cpu_core_hour: f64,
    pub memory_gb_hour: f64,
    pub gpu_hour: HashMap<GpuSku, f64>,
}

impl PriceTable {
    pub fn gpu_rate(&self, sku: GpuSku) -> f64 {
        self.gpu_hour.get(&sku).copied().unwrap_or(0.0)
    }
}

/// Health Evaluator weights (§4.2), overridable via `health.weights` (§6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthWeights {
    pub ready: f64,
    pub restart: f64,
    pub bad_state: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            ready: 0.60,
            restart: 0.25,
            bad_state: 0.15,
        }
    }
}

impl HealthWeights {
    fn validate(&self) -> ConfigResult<()> {
        let sum = self.ready + self.restart + self.bad_state;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::invalid(
                "health.weights",
                format!("weights must sum to 1.0, got {sum}"),
            ));
        }
        Ok(())
    }
}

/// The single configuration record described in §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub max_concurrent_plans: usize,
    pub per_decision_timeout_seconds: u64,
    pub canary_default: CanaryConfig,
    pub rollback_default: RollbackConfig,
    pub policy_default_mode: PlanMode,
    pub price_table: PriceTable,
    pub health_weights: HealthWeights,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_plans: 16,
            per_decision_timeout_seconds: 300,
            canary_default: CanaryConfig::default(),
            rollback_default: RollbackConfig::default(),
            policy_default_mode: PlanMode::Enforce,
            price_table: PriceTable::default(),
            health_weights: HealthWeights::default(),
        }
    }
}

impl ControllerConfig {
    /// Diagnostics beyond what KDL parsing alone catches — out-of-range
    /// percentages, non-normalized weights, zero intervals.
    pub fn validate(&self) -> ConfigResult<()> {
        self.health_weights.validate()?;

        if self.max_concurrent_plans == 0 {
            return Err(ConfigError::invalid(
                "max_concurrent_plans",
                "must be at least 1",
            ));
        }
        if self.canary_default.initial_percent == 0 || self.canary_default.initial_percent > 100 {
            return Err(ConfigError::invalid(
                "canary.initial_percent",
                "must be in 1..=100",
            ));
        }
        if self.canary_default.increment_percent == 0 {
            return Err(ConfigError::invalid(
                "canary.increment_percent",
                "must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.canary_default.min_health_score) {
            return Err(ConfigError::invalid(
                "canary.min_health_score",
                "must be in 0.0..=1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.rollback_default.min_health_score) {
            return Err(ConfigError::invalid(
                "rollback.min_health_score",
                "must be in 0.0..=1.0",
            ));
        }
        if self.rollback_default.consecutive_bad_threshold == 0 {
            return Err(ConfigError::invalid(
                "rollback.consecutive_bad_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn parse_plan_mode(s: &str) -> ConfigResult<PlanMode> {
    match s {
        "enforce" => Ok(PlanMode::Enforce),
        "dry_run" => Ok(PlanMode::DryRun),
        "shadow" => Ok(PlanMode::Shadow),
        other => Err(ConfigError::invalid(
            "policy.default_mode",
            format!("unknown mode '{other}'"),
        )),
    }
}

fn parse_gpu_sku(s: &str) -> ConfigResult<GpuSku> {
    match s {
        "L4" => Ok(GpuSku::L4),
        "A100" => Ok(GpuSku::A100),
        "H100" => Ok(GpuSku::H100),
        "T4" => Ok(GpuSku::T4),
        other => Err(ConfigError::invalid(
            "price_table.gpu_hour",
            format!("unknown gpu sku '{other}'"),
        )),
    }
}

/// Parse a controller configuration from KDL text, e.g.:
///
/// ```kdl
/// max-concurrent-plans 16
/// per-decision-timeout-seconds 300
/// policy-default-mode "enforce"
///
/// canary {
///     initial-percent 10
///     increment-percent 10
///     step-duration-seconds 300
///     min-health-score 0.85
///     analysis-samples 3
///     max-duration-seconds 3600
///     auto-promote true
///     abort-on-failure true
/// }
///
/// rollback {
///     min-health-score 0.70
///     check-interval-seconds 30
///     consecutive-bad-threshold 3
///     cooldown-seconds 300
/// }
///
/// health-weights {
///     ready 0.60
///     restart 0.25
///     bad-state 0.15
/// }
///
/// price-table {
///     cpu-core-hour 0.05
///     memory-gb-hour 0.01
///     gpu-hour "L4" 0.60
///     gpu-hour "A100" 2.50
/// }
/// ```
///
/// Every top-level section is optional; omitted sections fall back to their
/// `Default` (the same defaults named in §4.5/§4.6/§6).
pub fn parse_controller_config(text: &str) -> ConfigResult<ControllerConfig> {
    let doc = KdlDocument::from_str(text)?;
    let mut cfg = ControllerConfig::default();

    if let Some(node) = child(&doc, "max-concurrent-plans") {
        cfg.max_concurrent_plans = arg_u64(node, "max-concurrent-plans")? as usize;
    }
    if let Some(node) = child(&doc, "per-decision-timeout-seconds") {
        cfg.per_decision_timeout_seconds = arg_u64(node, "per-decision-timeout-seconds")?;
    }
    if let Some(node) = child(&doc, "policy-default-mode") {
        cfg.policy_default_mode = parse_plan_mode(&arg_str(node, "policy-default-mode")?)?;
    }

    if let Some(node) = child(&doc, "canary") {
        let children = node
            .children()
            .ok_or_else(|| ConfigError::invalid("canary", "expected a block"))?;
        if let Some(n) = child(children, "initial-percent") {
            cfg.canary_default.initial_percent = arg_u32(n, "canary.initial_percent")? as u8;
        }
        if let Some(n) = child(children, "increment-percent") {
            cfg.canary_default.increment_percent = arg_u32(n, "canary.increment_percent")? as u8;
        }
        if let Some(n) = child(children, "step-duration-seconds") {
            cfg.canary_default.step_duration_seconds = arg_u64(n, "canary.step_duration_seconds")?;
        }
        if let Some(n) = child(children, "min-health-score") {
            cfg.canary_default.min_health_score = arg_f64(n, "canary.min_health_score")?;
        }
        if let Some(n) = child(children, "analysis-samples") {
            cfg.canary_default.analysis_samples = arg_u32(n, "canary.analysis_samples")?;
        }
        if let Some(n) = child(children, "max-duration-seconds") {
            cfg.canary_default.max_duration_seconds = arg_u64(n, "canary.max_duration_seconds")?;
        }
        if let Some(n) = child(children, "auto-promote") {
            cfg.canary_default.auto_promote = arg_bool(n, "canary.auto_promote")?;
        }
        if let Some(n) = child(children, "abort-on-failure") {
            cfg.canary_default.abort_on_failure = arg_bool(n, "canary.abort_on_failure")?;
        }
    }

    if let Some(node) = child(&doc, "rollback") {
        let children = node
            .children()
            .ok_or_else(|| ConfigError::invalid("rollback", "expected a block"))?;
        if let Some(n) = child(children, "min-health-score") {
            cfg.rollback_default.min_health_score = arg_f64(n, "rollback.min_health_score")?;
        }
        if let Some(n) = child(children, "check-interval-seconds") {
            cfg.rollback_default.check_interval_seconds =
                arg_u64(n, "rollback.check_interval_seconds")?;
        }
        if let Some(n) = child(children, "consecutive-bad-threshold") {
            cfg.rollback_default.consecutive_bad_threshold =
                arg_u32(n, "rollback.consecutive_bad_threshold")?;
        }
        if let Some(n) = child(children, "cooldown-seconds") {
            cfg.rollback_default.cooldown_seconds = arg_u64(n, "rollback.cooldown_seconds")?;
        }
    }

    if let Some(node) = child(&doc, "health-weights") {
        let children = node
            .children()
            .ok_or_else(|| ConfigError::invalid("health-weights", "expected a block"))?;
        if let Some(n) = child(children, "ready") {
            cfg.health_weights.ready = arg_f64(n, "health_weights.ready")?;
        }
        if let Some(n) = child(children, "restart") {
            cfg.health_weights.restart = arg_f64(n, "health_weights.restart")?;
        }
        if let Some(n) = child(children, "bad-state") {
            cfg.health_weights.bad_state = arg_f64(n, "health_weights.bad_state")?;
        }
    }

    if let Some(node) = child(&doc, "price-table") {
        let children = node
            .children()
            .ok_or_else(|| ConfigError::invalid("price-table", "expected a block"))?;
        if let Some(n) = child(children, "cpu-core-hour") {
            cfg.price_table.cpu_core_hour = arg_f64(n, "price_table.cpu_core_hour")?;
        }
        if let Some(n) = child(children, "memory-gb-hour") {
            cfg.price_table.memory_gb_hour = arg_f64(n, "price_table.memory_gb_hour")?;
        }
        for n in children_named(children, "gpu-hour") {
            let (sku, rate) = crate::kdl_util::positional_str_then_f64(n, "price_table.gpu_hour")?;
            cfg.price_table.gpu_hour.insert(parse_gpu_sku(&sku)?, rate);
        }
    }

    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ControllerConfig::default().validate().is_ok());
    }

    #[test]
    fn parses_full_document() {
        let text = r#"
max-concurrent-plans 8
per-decision-timeout-seconds 120
policy-default-mode "dry_run"

canary {
    initial-percent 20
    increment-percent 20
    min-health-score 0.9
}

rollback {
    min-health-score 0.6
    consecutive-bad-threshold 2
}

price-table {
    cpu-core-hour 0.05
    gpu-hour "L4" 0.60
}
"#;
        let cfg = parse_controller_config(text).unwrap();
        assert_eq!(cfg.max_concurrent_plans, 8);
        assert_eq!(cfg.per_decision_timeout_seconds, 120);
        assert_eq!(cfg.policy_default_mode, PlanMode::DryRun);
        assert_eq!(cfg.canary_default.initial_percent, 20);
        assert_eq!(cfg.rollback_default.consecutive_bad_threshold, 2);
        assert_eq!(cfg.price_table.gpu_rate(GpuSku::L4), 0.60);
    }

    #[test]
    fn rejects_unnormalized_health_weights() {
        let text = r#"
health-weights {
    ready 0.5
    restart 0.5
    bad-state 0.5
}
"#;
        assert!(parse_controller_config(text).is_err());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = parse_controller_config("").unwrap();
        assert_eq!(cfg.max_concurrent_plans, 16);
        assert_eq!(cfg.policy_default_mode, PlanMode::Enforce);
        assert_eq!(cfg.price_table.gpu_hour.len(), 0);
    }
}
