//! `ControllerApi`: the request/response surface consumed by a thin
//! transport layer outside the core (spec §6). Each operation is a typed
//! RPC; the wire encoding (HTTP/JSON, gRPC, …) is deliberately not this
//! crate's concern.

use async_trait::async_trait;

use crate::ResourceId;
use crate::canary::CanaryState;
use crate::plan::{ActionPlan, PlanResult};
use crate::policy::Policy;
use crate::rollback::{RollbackConfig, RollbackReason, RollbackRecord};

/// Per-deployment canary start parameters (§6 StartCanary input).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CanaryConfig {
    pub initial_percent: u8,
    pub increment_percent: u8,
    pub step_duration_seconds: u64,
    pub min_health_score: f64,
    pub analysis_samples: u32,
    pub max_duration_seconds: u64,
    pub auto_promote: bool,
    pub abort_on_failure: bool,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            initial_percent: 10,
            increment_percent: 10,
            step_duration_seconds: 300,
            min_health_score: 0.85,
            analysis_samples: 3,
            max_duration_seconds: 3600,
            auto_promote: true,
            abort_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StartCanaryRequest {
    pub deployment_id: ResourceId,
    pub new_spec: crate::deployment::ResourceSpec,
    pub config: Option<CanaryConfig>,
}

/// The eight operations of §6's request/response table. Implemented by the
/// Plan Executor, which owns enough state (policy engine handle, canary/
/// rollback controller registries) to answer all of them.
#[async_trait]
pub trait ControllerApi: Send + Sync {
    async fn submit_action_plan(&self, plan: ActionPlan) -> crate::Result<PlanResult>;

    async fn get_plan_status(&self, plan_id: ResourceId) -> crate::Result<PlanResult>;

    async fn start_canary(&self, request: StartCanaryRequest) -> crate::Result<ResourceId>;

    async fn abort_canary(&self, canary_id: ResourceId, reason: String) -> crate::Result<()>;

    async fn get_canary_status(&self, canary_id: ResourceId) -> crate::Result<CanaryState>;

    async fn register_policy(&self, policy: Policy) -> crate::Result<ResourceId>;

    async fn update_policy(&self, policy: Policy) -> crate::Result<ResourceId>;

    async fn disable_policy(&self, policy_id: ResourceId) -> crate::Result<ResourceId>;

    async fn register_deployment_for_rollback(
        &self,
        deployment_id: ResourceId,
        config: RollbackConfig,
    ) -> crate::Result<()>;

    async fn trigger_rollback(
        &self,
        deployment_id: ResourceId,
        reason: RollbackReason,
        to_revision: Option<u64>,
    ) -> crate::Result<RollbackRecord>;
}
