//! `ActionPlan`: an ordered, transactionally-intended sequence of decisions
//! (spec §3, §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::decision::{Decision, DecisionResult};

/// Where a plan originated; used by `change_freeze` exemption rules (§4.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Bridge,
    Api,
    Operator,
}

impl std::fmt::Display for PlanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanSource::Bridge => write!(f, "bridge"),
            PlanSource::Api => write!(f, "api"),
            PlanSource::Operator => write!(f, "operator"),
        }
    }
}

/// Evaluation mode a plan is submitted under (§4.3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    Enforce,
    DryRun,
    Shadow,
}

impl Default for PlanMode {
    fn default() -> Self {
        PlanMode::Enforce
    }
}

/// Lifecycle status of an `ActionPlan` (§3 invariant: monotonic advance,
/// `rejected` and terminal states are sinks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Approved,
    Rejected,
    Executing,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Rejected
                | PlanStatus::Completed
                | PlanStatus::Failed
                | PlanStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal monotonic advance (§3 invariant).
    /// Terminal states and `rejected` are sinks; every other edge matches
    /// the ordering implied by §3 and §4.7's step-by-step sequence.
    pub fn can_advance_to(&self, next: PlanStatus) -> bool {
        use PlanStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Approved, Executing)
                | (Approved, Completed) // shadow short-circuit (§4.7 step 2)
                | (Executing, AwaitingApproval)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Executing, Cancelled)
                | (AwaitingApproval, Executing)
                | (AwaitingApproval, Cancelled)
        )
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Approved => "approved",
            PlanStatus::Rejected => "rejected",
            PlanStatus::Executing => "executing",
            PlanStatus::AwaitingApproval => "awaiting_approval",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// An ordered sequence of decisions submitted for execution (§3 ActionPlan).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    pub id: ResourceId,
    pub correlation_id: String,
    pub source: PlanSource,
    pub mode: PlanMode,
    pub decisions: Vec<Decision>,
    pub status: PlanStatus,
    pub abort_on_first_failure: bool,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl ActionPlan {
    /// Attempt to move to `next`; returns `Err` (the current status
    /// unchanged) when the transition violates the monotonic-advance
    /// invariant (§3).
    pub fn advance(&mut self, next: PlanStatus) -> crate::Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(crate::Error::Internal(format!(
                "illegal plan status transition {} -> {next}",
                self.status
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// A violation recorded by the Policy Engine against one decision (§4.3,
/// §6 PlanResult).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub policy_id: ResourceId,
    pub rule_type: String,
    pub action: crate::policy::RuleAction,
    pub message: String,
}

/// Result of evaluating or executing a plan, returned by `SubmitActionPlan`
/// / `GetPlanStatus` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub plan_id: ResourceId,
    pub status: PlanStatus,
    pub approved: bool,
    pub violations: Vec<Violation>,
    pub per_decision: Vec<DecisionResult>,
    pub shadow: bool,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_and_terminal_states_are_sinks() {
        assert!(!PlanStatus::Rejected.can_advance_to(PlanStatus::Executing));
        assert!(!PlanStatus::Completed.can_advance_to(PlanStatus::Executing));
        assert!(!PlanStatus::Failed.can_advance_to(PlanStatus::Completed));
    }

    #[test]
    fn pending_can_reach_rejected_or_approved() {
        assert!(PlanStatus::Pending.can_advance_to(PlanStatus::Approved));
        assert!(PlanStatus::Pending.can_advance_to(PlanStatus::Rejected));
    }
}
