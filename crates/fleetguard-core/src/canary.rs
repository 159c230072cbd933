//! Canary rollout state (spec §3 CanaryState, §4.5).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;

/// Canary Controller state machine phase (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanaryPhase {
    Initializing,
    DeployingCanary,
    Analyzing,
    Promoting,
    Promoted,
    Failed,
}

impl CanaryPhase {
    /// Terminal at `promoted` or `failed` (§3 CanaryState lifecycle).
    pub fn is_terminal(&self) -> bool {
        matches!(self, CanaryPhase::Promoted | CanaryPhase::Failed)
    }
}

impl std::fmt::Display for CanaryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CanaryPhase::Initializing => "initializing",
            CanaryPhase::DeployingCanary => "deploying_canary",
            CanaryPhase::Analyzing => "analyzing",
            CanaryPhase::Promoting => "promoting",
            CanaryPhase::Promoted => "promoted",
            CanaryPhase::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A single recorded step transition, used to build `canary.step_promoted`
/// events and for post-hoc inspection (§3 CanaryState "history").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTransition {
    pub step: u32,
    pub from_phase: CanaryPhase,
    pub to_phase: CanaryPhase,
    pub canary_weight: u8,
    pub health_score: f64,
    pub at: DateTime<Utc>,
}

/// Per active canary rollout (§3 CanaryState).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryState {
    pub id: ResourceId,
    pub deployment_id: ResourceId,
    pub phase: CanaryPhase,
    /// Integer percent 0-100.
    pub canary_weight: u8,
    pub step: u32,
    pub last_health_score: f64,
    pub history: Vec<StepTransition>,
    pub started_at: DateTime<Utc>,
    /// Pre-start stable replica count, restored on abort (§4.5 failure
    /// semantics).
    pub pre_start_stable_replicas: u32,
}

impl CanaryState {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Observes every state transition a canary run goes through (§5: "CanaryState
/// is owned by its controller instance; externally observable via a
/// read-only snapshot"). Lets the process holding the canonical registry
/// stay in sync without the controller depending on that registry's crate.
#[async_trait]
pub trait CanaryObserver: Send + Sync {
    async fn observe(&self, state: &CanaryState);
}

/// No-op observer for callers with no external registry to synchronize
/// (unit tests, one-shot runs that only care about the terminal return
/// value).
pub struct NullCanaryObserver;

#[async_trait]
impl CanaryObserver for NullCanaryObserver {
    async fn observe(&self, _state: &CanaryState) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_promoted_and_failed_are_terminal() {
        assert!(CanaryPhase::Promoted.is_terminal());
        assert!(CanaryPhase::Failed.is_terminal());
        assert!(!CanaryPhase::Analyzing.is_terminal());
        assert!(!CanaryPhase::Initializing.is_terminal());
    }
}
