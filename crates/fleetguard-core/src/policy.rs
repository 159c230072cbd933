//! Policy and PolicyRule data model (spec §3, §4.3).
//!
//! The evaluation algorithm itself lives in `fleetguard_policy::engine`; this
//! crate only owns the shapes both the engine and the executor need to
//! exchange.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ResourceId;

/// Action taken when a rule's constraint is violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Lowest precedence first so `max` tie-breaks to `Reject` (§4.3 tie-break).
    Log,
    Warn,
    Reject,
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleAction::Reject => write!(f, "reject"),
            RuleAction::Warn => write!(f, "warn"),
            RuleAction::Log => write!(f, "log"),
        }
    }
}

/// Rate-limit scope partition (§4.3, glossary "Rate scope").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScope {
    Global,
    Cluster,
    Namespace,
    Workload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostCeilingConstraint {
    pub max_usd_per_hour: f64,
    pub cost_source: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaConstraint {
    pub max_replicas: Option<u32>,
    pub max_cpu_cores: Option<f64>,
    pub max_memory_bytes: Option<u64>,
    pub max_gpu_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaConstraint {
    pub min_uptime: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloConstraint {
    pub max_latency_ms_p95: Option<f64>,
    pub min_success_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConstraint {
    pub max_actions: u32,
    pub interval_seconds: u64,
    pub scope: RateScope,
}

/// An absolute or recurring window, with an optional per-source exemption
/// list (§4.3 `change_freeze`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FreezeWindow {
    Absolute {
        /// RFC 3339 timestamps carrying their own offset; see DESIGN.md for
        /// why `chrono::FixedOffset` stands in for full IANA tz support.
        start: chrono::DateTime<chrono::FixedOffset>,
        end: chrono::DateTime<chrono::FixedOffset>,
    },
    Recurring {
        days_of_week: Vec<chrono::Weekday>,
        hours: Vec<u8>,
        tz_offset_seconds: i32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeFreezeConstraint {
    pub window: FreezeWindow,
    pub exempt_sources: Vec<String>,
}

/// Tagged variant over the six constraint kinds (§3 PolicyRule, §4.3 table).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum RuleConstraint {
    CostCeiling(CostCeilingConstraint),
    Quota(QuotaConstraint),
    Sla(SlaConstraint),
    Slo(SloConstraint),
    RateLimit(RateLimitConstraint),
    ChangeFreeze(ChangeFreezeConstraint),
}

impl RuleConstraint {
    pub fn rule_type(&self) -> &'static str {
        match self {
            RuleConstraint::CostCeiling(_) => "cost_ceiling",
            RuleConstraint::Quota(_) => "quota",
            RuleConstraint::Sla(_) => "sla",
            RuleConstraint::Slo(_) => "slo",
            RuleConstraint::RateLimit(_) => "rate_limit",
            RuleConstraint::ChangeFreeze(_) => "change_freeze",
        }
    }
}

/// A single rule inside a `Policy` (§3 PolicyRule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub constraint: RuleConstraint,
    pub action: RuleAction,
}

/// A label-match expression over a decision's target labels (§3 Policy
/// selector, §4.3 step 2a). `None` matches every target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selector {
    pub match_labels: HashMap<String, String>,
}

impl Selector {
    pub fn matches(&self, target_labels: &HashMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| target_labels.get(k) == Some(v))
    }
}

/// A named, prioritized, enable-able bundle of rules (§3 Policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: ResourceId,
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub selector: Selector,
    pub rules: Vec<PolicyRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_outranks_warn_outranks_log() {
        assert!(RuleAction::Reject > RuleAction::Warn);
        assert!(RuleAction::Warn > RuleAction::Log);
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel = Selector::default();
        assert!(sel.matches(&HashMap::new()));
        let mut labels = HashMap::new();
        labels.insert("team".to_string(), "ml-platform".to_string());
        assert!(sel.matches(&labels));
    }

    #[test]
    fn selector_requires_all_match_labels_present() {
        let mut sel = Selector::default();
        sel.match_labels
            .insert("env".to_string(), "prod".to_string());
        assert!(!sel.matches(&HashMap::new()));
    }
}
