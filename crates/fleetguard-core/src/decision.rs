//! Decisions: the imperative unit inside an `ActionPlan` (spec §3, §9).
//!
//! Source systems describe `decision.params` with a free-form mapping; here
//! it is a tagged variant per verb with a typed payload, per the Design
//! Notes on heterogeneous decision payloads. An unrecognized verb/payload
//! combination is rejected at plan-validation time, never at dispatch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ResourceId;
use crate::workload::GpuRequest;

/// What a decision targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub workload_id: ResourceId,
    pub cluster_id: ResourceId,
    pub namespace: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleParams {
    pub replicas: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleParams {
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackParams {
    pub revision: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateParams {
    pub image: String,
    pub cpu_cores: Option<f64>,
    pub memory_bytes: Option<u64>,
    pub gpu: Option<GpuRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainParams {
    pub grace_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartParams {
    pub reason: Option<String>,
}

/// Per-verb typed payload (§9: tagged variant, not a free-form mapping).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum DecisionParams {
    Scale(ScaleParams),
    Reschedule(RescheduleParams),
    Rollback(RollbackParams),
    Update(UpdateParams),
    Drain(DrainParams),
    Restart(RestartParams),
}

impl DecisionParams {
    pub fn verb(&self) -> &'static str {
        match self {
            DecisionParams::Scale(_) => "scale",
            DecisionParams::Reschedule(_) => "reschedule",
            DecisionParams::Rollback(_) => "rollback",
            DecisionParams::Update(_) => "update",
            DecisionParams::Drain(_) => "drain",
            DecisionParams::Restart(_) => "restart",
        }
    }
}

/// Safety constraints attached to a single decision (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyBlock {
    /// Refuse the decision if it affects more than this fraction of the
    /// target's current fleet (§4.7 blast-radius check).
    pub max_blast_radius_percent: Option<u8>,
    /// Hold the decision in `awaiting_approval` until a matching approval
    /// event arrives (§4.7 approval gate).
    pub requires_approval: bool,
    pub ttl_seconds: Option<u64>,
}

impl Default for SafetyBlock {
    fn default() -> Self {
        Self {
            max_blast_radius_percent: None,
            requires_approval: false,
            ttl_seconds: None,
        }
    }
}

/// A single imperative within an `ActionPlan` (§3 Decision).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: ResourceId,
    pub target: TargetDescriptor,
    pub params: DecisionParams,
    pub safety: SafetyBlock,
    pub timeout_seconds: Option<u64>,
}

/// Outcome recorded against a single decision after dispatch (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Pending,
    AwaitingApproval,
    Started,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionOutcome::Pending => "pending",
            DecisionOutcome::AwaitingApproval => "awaiting_approval",
            DecisionOutcome::Started => "started",
            DecisionOutcome::Completed => "completed",
            DecisionOutcome::Failed => "failed",
            DecisionOutcome::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Per-decision result carried in `PlanResult.per_decision` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResult {
    pub decision_id: ResourceId,
    pub outcome: DecisionOutcome,
    pub message: Option<String>,
}
