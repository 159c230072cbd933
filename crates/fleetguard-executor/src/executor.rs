//! Plan Executor (C7, spec §4.7): the `ControllerApi` implementation that
//! ties the Policy Engine, Canary Controller, and Rollback Controller
//! together into the single entry point a transport layer calls into.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use fleetguard_config::{ControllerConfig, HealthWeights};
use fleetguard_core::ResourceId;
use fleetguard_core::api::{CanaryConfig, ControllerApi, StartCanaryRequest};
use fleetguard_core::canary::{CanaryPhase, CanaryState};
use fleetguard_core::cancel::{CancelSource, CancelToken};
use fleetguard_core::decision::{Decision, DecisionOutcome, DecisionParams, DecisionResult, UpdateParams};
use fleetguard_core::deployment::{DeploymentStatus, DeploymentStrategy, ResourcePatch, ResourceSpec};
use fleetguard_core::driver::ClusterDriver;
use fleetguard_core::error::Error;
use fleetguard_core::events::{Event, EventEnvelope, EventKind, EventSink, SequenceCounter};
use fleetguard_core::plan::{ActionPlan, PlanMode, PlanResult, PlanStatus, Violation};
use fleetguard_core::policy::Policy;
use fleetguard_core::rollback::{RollbackConfig, RollbackReason, RollbackRecord};
use fleetguard_core::Result;

use fleetguard_canary::{CanaryController, CanaryTarget};
use fleetguard_policy::{EvaluationContext, PolicyEngine};
use fleetguard_rollback::RollbackController;

use crate::locks::TargetLocks;
use crate::state::{ControllerState, StateLookup};

const WORKER_ID: &str = "plan-executor";

/// Policy-gated decision dispatch and the `ControllerApi` implementation
/// the rest of this workspace exists to back (§4.7, §6).
///
/// Named to match the request/response table in §6: every `ControllerApi`
/// method here does exactly the step described there, nothing more.
pub struct PlanExecutorApi {
    state: Arc<ControllerState>,
    driver: Arc<dyn ClusterDriver>,
    events: Arc<dyn EventSink>,
    sequence: Arc<SequenceCounter>,
    policy_engine: Arc<PolicyEngine>,
    canary: Arc<CanaryController>,
    rollback: Arc<RollbackController>,
    locks: Arc<TargetLocks>,
    semaphore: Arc<tokio::sync::Semaphore>,
    config: ControllerConfig,
}

impl PlanExecutorApi {
    pub fn new(
        state: Arc<ControllerState>,
        driver: Arc<dyn ClusterDriver>,
        events: Arc<dyn EventSink>,
        sequence: Arc<SequenceCounter>,
        rollback: Arc<RollbackController>,
        config: ControllerConfig,
    ) -> Self {
        let policy_engine = Arc::new(PolicyEngine::new(Arc::new(fleetguard_policy::RateLimiter::new())));
        let canary_observer = Arc::new(StateLookup(state.clone()));
        let canary = Arc::new(CanaryController::new(driver.clone(), events.clone(), sequence.clone(), canary_observer));
        Self {
            state,
            driver,
            events,
            sequence,
            policy_engine,
            canary,
            rollback,
            locks: Arc::new(TargetLocks::new()),
            semaphore: Arc::new(tokio::sync::Semaphore::new(config.max_concurrent_plans)),
            config,
        }
    }

    async fn publish(&self, kind: EventKind) {
        self.events
            .publish(Event {
                envelope: EventEnvelope {
                    timestamp_utc: Utc::now(),
                    worker_id: WORKER_ID.to_string(),
                    sequence: self.sequence.next(),
                    correlation_id: None,
                },
                kind,
            })
            .await;
    }

    fn target_keys(plan: &ActionPlan) -> Vec<(ResourceId, ResourceId)> {
        plan.decisions
            .iter()
            .map(|d| (d.target.workload_id, d.target.cluster_id))
            .collect()
    }

    /// Fraction of the target's current fleet this decision affects
    /// (§4.7 blast-radius check). Scale is proportional to the replica
    /// delta; every other verb is treated as affecting the whole target.
    async fn blast_radius_fraction(&self, decision: &Decision) -> f64 {
        let current = self
            .state
            .deployment_for_target(decision.target.workload_id, decision.target.cluster_id)
            .map(|d| d.replicas);

        match &decision.params {
            DecisionParams::Scale(p) => {
                let Some(current) = current.filter(|&c| c > 0) else {
                    return 1.0;
                };
                let delta = (p.replicas as i64 - current as i64).unsigned_abs();
                (delta as f64 / current as f64).min(1.0)
            }
            _ => 1.0,
        }
    }

    async fn dispatch_decision(&self, plan_id: ResourceId, decision: &Decision) -> Result<DecisionResult> {
        let deployment = self
            .state
            .deployment_for_target(decision.target.workload_id, decision.target.cluster_id);
        let Some(deployment) = deployment else {
            return Ok(DecisionResult {
                decision_id: decision.id,
                outcome: DecisionOutcome::Failed,
                message: Some("no deployment registered for target".into()),
            });
        };
        let Some(spec) = self.state.resource_spec_for(deployment.id) else {
            return Ok(DecisionResult {
                decision_id: decision.id,
                outcome: DecisionOutcome::Failed,
                message: Some("workload record missing for target".into()),
            });
        };

        self.publish(EventKind::DecisionStarted {
            plan_id,
            decision_id: decision.id,
        })
        .await;

        let outcome: Result<()> = match &decision.params {
            DecisionParams::Scale(p) => match self.driver.scale(&spec.name, &spec.namespace, p.replicas).await {
                Ok(r) => {
                    self.state.update_deployment(deployment.id, |d| d.replicas = r.replicas);
                    Ok(())
                }
                Err(err) => Err(err),
            },
            DecisionParams::Reschedule(p) => {
                let mut annotations = HashMap::new();
                annotations.insert("fleetguard.io/rescheduled-at".to_string(), Utc::now().to_rfc3339());
                self.driver
                    .update(
                        &spec.name,
                        &spec.namespace,
                        ResourcePatch {
                            image: p.image.clone(),
                            replicas: None,
                            annotations,
                        },
                    )
                    .await
                    .map(|_| ())
            }
            DecisionParams::Rollback(p) => self.driver.rollback(&spec.name, &spec.namespace, p.revision).await.map(|_| ()),
            // §4.7 step 3: route through the Canary Controller when the
            // deployment's strategy calls for a progressive rollout; a plain
            // rolling/blue_green deployment goes straight to `driver.update`.
            DecisionParams::Update(p) if deployment.strategy == DeploymentStrategy::Canary => {
                self.dispatch_update_via_canary(deployment.id, &spec, p).await
            }
            DecisionParams::Update(p) => {
                let mut annotations = HashMap::new();
                if let Some(cpu) = p.cpu_cores {
                    annotations.insert("fleetguard.io/cpu-cores".to_string(), cpu.to_string());
                }
                if let Some(mem) = p.memory_bytes {
                    annotations.insert("fleetguard.io/memory-bytes".to_string(), mem.to_string());
                }
                if let Some(gpu) = &p.gpu {
                    annotations.insert("fleetguard.io/gpu-sku".to_string(), format!("{:?}", gpu.sku));
                    annotations.insert("fleetguard.io/gpu-count".to_string(), gpu.count.to_string());
                }
                self.driver
                    .update(
                        &spec.name,
                        &spec.namespace,
                        ResourcePatch {
                            image: Some(p.image.clone()),
                            replicas: None,
                            annotations,
                        },
                    )
                    .await
                    .map(|_| ())
            }
            // No dedicated drain verb on `ClusterDriver` (§4.1): draining a
            // target is expressed as a graceful delete, the same primitive
            // a real k8s driver uses for `kubectl drain`-equivalent removal.
            DecisionParams::Drain(p) => self.driver.delete(&spec.name, &spec.namespace, p.grace_seconds).await,
            DecisionParams::Restart(_) => {
                // Bumping a timestamp annotation is how `kubectl rollout
                // restart` itself triggers a rolling restart without an
                // image or replica change.
                let mut annotations = HashMap::new();
                annotations.insert("fleetguard.io/restarted-at".to_string(), Utc::now().to_rfc3339());
                self.driver
                    .update(
                        &spec.name,
                        &spec.namespace,
                        ResourcePatch {
                            image: None,
                            replicas: None,
                            annotations,
                        },
                    )
                    .await
                    .map(|_| ())
            }
        };

        match outcome {
            Ok(()) => {
                self.publish(EventKind::DecisionCompleted {
                    plan_id,
                    decision_id: decision.id,
                })
                .await;
                Ok(DecisionResult {
                    decision_id: decision.id,
                    outcome: DecisionOutcome::Completed,
                    message: None,
                })
            }
            Err(err) => {
                self.publish(EventKind::DecisionFailed {
                    plan_id,
                    decision_id: decision.id,
                    message: err.to_string(),
                })
                .await;
                Ok(DecisionResult {
                    decision_id: decision.id,
                    outcome: DecisionOutcome::Failed,
                    message: Some(err.to_string()),
                })
            }
        }
    }

    /// Run an `update` decision's new spec through the Canary Controller to
    /// completion instead of a direct `driver.update` (§4.7 step 3). Blocks
    /// the dispatch loop for the duration of the rollout, which is bounded
    /// by the canary's own `max_duration_seconds` termination guarantee
    /// (§4.5); the decision's outcome tracks promote/abort.
    async fn dispatch_update_via_canary(
        &self,
        deployment_id: ResourceId,
        stable: &ResourceSpec,
        params: &UpdateParams,
    ) -> Result<()> {
        if self.state.deployment(deployment_id).and_then(|d| d.active_canary_id).is_some() {
            return Err(Error::AlreadyActive(format!("deployment {deployment_id} already has an active canary")));
        }

        let canary_id = ResourceId::new();
        let mut canary_spec = stable.clone();
        canary_spec.name = format!("{}-canary", stable.name);
        canary_spec.image = params.image.clone();
        canary_spec.replicas = 0;

        let target = CanaryTarget {
            deployment_id,
            stable: stable.clone(),
            canary: canary_spec,
            canary_id,
        };
        let config = self.config.canary_default.clone();
        let weights = self.config.health_weights;

        self.state.update_deployment(deployment_id, |d| {
            d.active_canary_id = Some(canary_id);
            d.status = DeploymentStatus::Scaling;
        });

        let final_state = self.canary.run(target, config, weights, CancelToken::never()).await?;
        let promoted = final_state.phase == CanaryPhase::Promoted;
        let last_score = final_state.last_health_score;
        self.state.put_canary(final_state);
        self.state.update_deployment(deployment_id, |d| {
            d.active_canary_id = None;
            d.status = if promoted { DeploymentStatus::Completed } else { DeploymentStatus::RolledBack };
            if promoted {
                d.replicas = d.replicas.max(1);
            }
        });

        if promoted {
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "canary rollout for deployment {deployment_id} failed at health score {last_score:.2}"
            )))
        }
    }

    /// Drive every decision in `plan` in order, honoring the blast-radius
    /// check and approval gate ahead of each dispatch (§4.7 steps 5-8).
    /// Stops at the first failure when `plan.abort_on_first_failure`.
    async fn dispatch_decisions(&self, plan: &ActionPlan) -> Vec<DecisionResult> {
        let mut results = Vec::with_capacity(plan.decisions.len());
        let mut failed = false;

        for decision in &plan.decisions {
            if failed {
                results.push(DecisionResult {
                    decision_id: decision.id,
                    outcome: DecisionOutcome::Skipped,
                    message: Some("prior decision failed and abort_on_first_failure is set".into()),
                });
                self.publish(EventKind::DecisionSkipped {
                    plan_id: plan.id,
                    decision_id: decision.id,
                    outcome: DecisionOutcome::Skipped,
                })
                .await;
                continue;
            }

            if let Some(max_percent) = decision.safety.max_blast_radius_percent {
                let fraction = self.blast_radius_fraction(decision).await;
                if fraction * 100.0 > max_percent as f64 {
                    results.push(DecisionResult {
                        decision_id: decision.id,
                        outcome: DecisionOutcome::Failed,
                        message: Some(format!(
                            "blast radius {:.1}% exceeds limit {max_percent}%",
                            fraction * 100.0
                        )),
                    });
                    failed = failed || plan.abort_on_first_failure;
                    continue;
                }
            }

            if decision.safety.requires_approval && !self.state.is_approved(decision.id) {
                results.push(DecisionResult {
                    decision_id: decision.id,
                    outcome: DecisionOutcome::AwaitingApproval,
                    message: None,
                });
                continue;
            }

            match self.dispatch_decision(plan.id, decision).await {
                Ok(result) => {
                    if result.outcome == DecisionOutcome::Failed {
                        failed = failed || plan.abort_on_first_failure;
                    }
                    results.push(result);
                }
                Err(err) => {
                    failed = failed || plan.abort_on_first_failure;
                    results.push(DecisionResult {
                        decision_id: decision.id,
                        outcome: DecisionOutcome::Failed,
                        message: Some(err.to_string()),
                    });
                }
            }
        }

        results
    }

    fn fleet_lookup(&self) -> Arc<dyn fleetguard_policy::FleetLookup> {
        Arc::new(StateLookup(self.state.clone()))
    }
}

#[async_trait]
impl ControllerApi for PlanExecutorApi {
    /// §4.7's full sequence: idempotent resubmission short-circuit, policy
    /// evaluation, shadow/dry_run short-circuit, per-target serialization
    /// and worker-cap acquisition, dispatch, plan-status advancement.
    async fn submit_action_plan(&self, mut plan: ActionPlan) -> Result<PlanResult> {
        if let Some(existing) = self.state.plan_result(plan.id) {
            if existing.status.is_terminal() {
                return Ok(existing);
            }
        }

        let start = std::time::Instant::now();
        self.publish(EventKind::PlanSubmitted { plan_id: plan.id }).await;

        let policies = self.state.policy_snapshot();
        let ctx = EvaluationContext {
            price_table: self.config.price_table.clone(),
            now: Utc::now(),
            fleet: self.fleet_lookup(),
        };
        let evaluation = self.policy_engine.evaluate(&plan, &policies, plan.mode, &ctx).await;

        if !evaluation.approved {
            plan.advance(PlanStatus::Rejected)?;
            self.publish(EventKind::PlanRejected {
                plan_id: plan.id,
                violations: evaluation.violations.clone(),
            })
            .await;
            let result = PlanResult {
                plan_id: plan.id,
                status: plan.status,
                approved: false,
                violations: evaluation.violations,
                per_decision: Vec::new(),
                shadow: false,
                duration_ms: start.elapsed().as_millis() as u64,
            };
            self.state.store_plan_result(result.clone());
            return Ok(result);
        }

        plan.advance(PlanStatus::Approved)?;
        self.publish(EventKind::PlanApproved { plan_id: plan.id }).await;

        // dry_run and shadow are logically equivalent at this boundary:
        // both skip dispatch entirely and tag the result `shadow` (§4.3
        // mode semantics; §8 scenario B: dry_run makes "no driver calls").
        if matches!(plan.mode, PlanMode::DryRun | PlanMode::Shadow) {
            plan.advance(PlanStatus::Completed)?;
            self.publish(EventKind::PlanShadowExecuted { plan_id: plan.id }).await;
            let result = PlanResult {
                plan_id: plan.id,
                status: plan.status,
                approved: true,
                violations: evaluation.violations,
                per_decision: Vec::new(),
                shadow: true,
                duration_ms: start.elapsed().as_millis() as u64,
            };
            self.state.store_plan_result(result.clone());
            return Ok(result);
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Internal("plan executor semaphore closed".into()))?;
        let _guards = self.locks.acquire(Self::target_keys(&plan)).await;

        plan.advance(PlanStatus::Executing)?;
        plan.executed_at = Some(Utc::now());

        let per_decision = self.dispatch_decisions(&plan).await;

        let any_awaiting = per_decision.iter().any(|r| r.outcome == DecisionOutcome::AwaitingApproval);
        let any_failed = per_decision.iter().any(|r| r.outcome == DecisionOutcome::Failed);

        if any_awaiting {
            plan.advance(PlanStatus::AwaitingApproval)?;
        } else if any_failed {
            plan.advance(PlanStatus::Failed)?;
            self.publish(EventKind::PlanFailed {
                plan_id: plan.id,
                message: "one or more decisions failed".into(),
            })
            .await;
        } else {
            plan.advance(PlanStatus::Completed)?;
            self.publish(EventKind::PlanCompleted {
                plan_id: plan.id,
                status: plan.status,
            })
            .await;
        }

        let result = PlanResult {
            plan_id: plan.id,
            status: plan.status,
            approved: true,
            violations: evaluation.violations,
            per_decision,
            shadow: false,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        self.state.store_plan_result(result.clone());
        Ok(result)
    }

    async fn get_plan_status(&self, plan_id: ResourceId) -> Result<PlanResult> {
        self.state
            .plan_result(plan_id)
            .ok_or_else(|| Error::not_found(format!("plan {plan_id}")))
    }

    /// Registers the canary id synchronously, then runs the rollout on a
    /// background task so the caller doesn't block on the full rollout
    /// duration (§6 StartCanary, §4.5).
    async fn start_canary(&self, request: StartCanaryRequest) -> Result<ResourceId> {
        let deployment = self
            .state
            .deployment(request.deployment_id)
            .ok_or_else(|| Error::not_found(format!("deployment {}", request.deployment_id)))?;
        if deployment.active_canary_id.is_some() {
            return Err(Error::AlreadyActive(format!("deployment {} already has an active canary", request.deployment_id)));
        }
        let stable = self
            .state
            .resource_spec_for(request.deployment_id)
            .ok_or_else(|| Error::not_found(format!("workload for deployment {}", request.deployment_id)))?;

        let canary_id = ResourceId::new();
        let mut canary_spec = request.new_spec;
        canary_spec.name = format!("{}-canary", stable.name);

        let target = CanaryTarget {
            deployment_id: request.deployment_id,
            stable,
            canary: canary_spec,
            canary_id,
        };
        let config: CanaryConfig = request.config.unwrap_or_else(|| self.config.canary_default.clone());
        let weights: HealthWeights = self.config.health_weights;

        let cancel_source = CancelSource::new();
        self.state.register_cancel(canary_id, cancel_source.clone());
        self.state.update_deployment(request.deployment_id, |d| {
            d.active_canary_id = Some(canary_id);
            d.status = DeploymentStatus::Scaling;
        });

        let canary = self.canary.clone();
        let state = self.state.clone();
        let token = cancel_source.token();
        tokio::spawn(async move {
            match canary.run(target, config, weights, token).await {
                Ok(final_state) => {
                    let deployment_id = final_state.deployment_id;
                    let promoted = final_state.phase == CanaryPhase::Promoted;
                    state.put_canary(final_state);
                    state.update_deployment(deployment_id, |d| {
                        d.active_canary_id = None;
                        d.status = if promoted { DeploymentStatus::Completed } else { DeploymentStatus::RolledBack };
                    });
                }
                Err(err) => {
                    tracing::error!(%canary_id, error = %err, "canary run returned an error instead of a terminal state");
                }
            }
        });

        Ok(canary_id)
    }

    async fn abort_canary(&self, canary_id: ResourceId, reason: String) -> Result<()> {
        let source = self
            .state
            .cancel_source(canary_id)
            .ok_or_else(|| Error::not_found(format!("canary {canary_id}")))?;
        if let Some(state) = self.state.canary(canary_id) {
            if state.is_terminal() {
                return Err(Error::AlreadyTerminal(format!("canary {canary_id}")));
            }
        }
        tracing::info!(%canary_id, %reason, "aborting canary");
        source.cancel();
        Ok(())
    }

    async fn get_canary_status(&self, canary_id: ResourceId) -> Result<CanaryState> {
        self.state
            .canary(canary_id)
            .ok_or_else(|| Error::not_found(format!("canary {canary_id}")))
    }

    async fn register_policy(&self, policy: Policy) -> Result<ResourceId> {
        Ok(self.state.put_policy(policy))
    }

    async fn update_policy(&self, policy: Policy) -> Result<ResourceId> {
        if self.state.policy(policy.id).is_none() {
            return Err(Error::not_found(format!("policy {}", policy.id)));
        }
        Ok(self.state.put_policy(policy))
    }

    async fn disable_policy(&self, policy_id: ResourceId) -> Result<ResourceId> {
        self.state
            .disable_policy(policy_id)
            .ok_or_else(|| Error::not_found(format!("policy {policy_id}")))
    }

    async fn register_deployment_for_rollback(&self, deployment_id: ResourceId, config: RollbackConfig) -> Result<()> {
        if self.state.deployment(deployment_id).is_none() {
            return Err(Error::not_found(format!("deployment {deployment_id}")));
        }
        self.rollback.register(deployment_id, config, Utc::now());
        Ok(())
    }

    async fn trigger_rollback(&self, deployment_id: ResourceId, reason: RollbackReason, to_revision: Option<u64>) -> Result<RollbackRecord> {
        let deployment = self
            .state
            .deployment(deployment_id)
            .ok_or_else(|| Error::not_found(format!("deployment {deployment_id}")))?;
        let spec = self
            .state
            .resource_spec_for(deployment_id)
            .ok_or_else(|| Error::not_found(format!("workload for deployment {deployment_id}")))?;

        let before = self.driver.get(&spec.name, &spec.namespace).await?;
        let from_revision = before.map(|r| r.revision).unwrap_or(0);

        self.publish(EventKind::DeploymentRollbackTriggered { deployment_id, reason }).await;
        let resource = self.driver.rollback(&spec.name, &spec.namespace, to_revision).await?;
        self.state.update_deployment(deployment_id, |d| {
            d.status = DeploymentStatus::RolledBack;
            d.replicas = resource.replicas;
        });
        self.publish(EventKind::DeploymentRolledBack {
            deployment_id,
            to_revision: resource.revision,
        })
        .await;

        let _ = deployment;
        Ok(RollbackRecord {
            id: ResourceId::new(),
            deployment_id,
            from_revision,
            to_revision: resource.revision,
            reason,
            triggered_by: WORKER_ID.to_string(),
            timestamp: Utc::now(),
        })
    }
}

/// Approval-gate integration seam (§4.7 step 7): marks a decision as
/// approved so a subsequent `submit_action_plan` resubmission (or a future
/// resume-from-awaiting_approval path) can proceed past the gate.
impl PlanExecutorApi {
    pub fn approve_decision(&self, decision_id: ResourceId) {
        self.state.approve(decision_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetguard_core::decision::{ScaleParams, SafetyBlock, TargetDescriptor};
    use fleetguard_core::deployment::{DeploymentStrategy, ResourceSpec};
    use fleetguard_core::events::ChannelEventSink;
    use fleetguard_core::plan::PlanSource;
    use fleetguard_core::policy::{CostCeilingConstraint, PolicyRule, RuleAction, RuleConstraint, Selector};
    use fleetguard_core::workload::{GpuRequest, GpuSku, ResourceRequest, Workload, WorkloadKind};
    use fleetguard_driver::SimulatedDriver;
    use fleetguard_rollback::DeploymentLookup;

    async fn make_executor() -> (PlanExecutorApi, ResourceId, ResourceId, ResourceId) {
        let driver = Arc::new(SimulatedDriver::new());
        let state = Arc::new(ControllerState::new());
        let events = Arc::new(ChannelEventSink::new(256));
        let sequence = Arc::new(SequenceCounter::new());

        let workload = Workload {
            id: ResourceId::new(),
            name: "infer".into(),
            kind: WorkloadKind::Inference,
            image: "registry/infer:v1".into(),
            resources: ResourceRequest {
                cpu_cores: 2.0,
                memory_bytes: 0,
                gpu: Some(GpuRequest { count: 1, sku: GpuSku::L4 }),
            },
            env: HashMap::new(),
            config_ref: None,
        };
        let cluster_id = ResourceId::new();
        let now = Utc::now();
        let deployment = fleetguard_core::deployment::Deployment {
            id: ResourceId::new(),
            workload_id: workload.id,
            cluster_id,
            namespace: "ml".into(),
            replicas: 2,
            strategy: DeploymentStrategy::Rolling,
            canary_config: None,
            status: DeploymentStatus::Running,
            active_canary_id: None,
            created_at: now,
            updated_at: now,
        };
        let deployment_id = deployment.id;
        let workload_id = workload.id;
        state.put_workload(workload);
        state.put_deployment(deployment);

        driver
            .create(ResourceSpec {
                name: "infer".into(),
                namespace: "ml".into(),
                image: "registry/infer:v1".into(),
                replicas: 2,
                workload_id,
                labels: HashMap::new(),
                env: HashMap::new(),
            })
            .await
            .unwrap();

        let lookup = Arc::new(StateLookup(state.clone()));
        let rollback = Arc::new(RollbackController::new(
            driver.clone(),
            lookup.clone() as Arc<dyn DeploymentLookup>,
            events.clone(),
            sequence.clone(),
        ));

        let executor = PlanExecutorApi::new(
            state.clone(),
            driver.clone() as Arc<dyn ClusterDriver>,
            events.clone(),
            sequence.clone(),
            rollback,
            ControllerConfig::default(),
        );
        (executor, workload_id, cluster_id, deployment_id)
    }

    fn scale_plan(mode: PlanMode, workload_id: ResourceId, cluster_id: ResourceId, replicas: u32) -> ActionPlan {
        ActionPlan {
            id: ResourceId::new(),
            correlation_id: "corr".into(),
            source: PlanSource::Api,
            mode,
            decisions: vec![Decision {
                id: ResourceId::new(),
                target: TargetDescriptor {
                    workload_id,
                    cluster_id,
                    namespace: "ml".into(),
                    labels: HashMap::new(),
                },
                params: DecisionParams::Scale(ScaleParams { replicas }),
                safety: SafetyBlock::default(),
                timeout_seconds: None,
            }],
            status: PlanStatus::Pending,
            abort_on_first_failure: false,
            created_at: Utc::now(),
            executed_at: None,
        }
    }

    // Scenario A (spec §8): cost ceiling $1.00/hr, scale to replicas=10 with
    // cpu=2, gpu=1xL4 -> estimated cost 7.00 -> rejected.
    #[tokio::test]
    async fn scenario_a_rejects_over_cost_ceiling() {
        let (executor, workload_id, cluster_id, _) = make_executor().await;
        executor
            .register_policy(Policy {
                id: ResourceId::new(),
                name: "cap".into(),
                priority: 0,
                enabled: true,
                selector: Selector::default(),
                rules: vec![PolicyRule {
                    constraint: RuleConstraint::CostCeiling(CostCeilingConstraint {
                        max_usd_per_hour: 1.00,
                        cost_source: None,
                    }),
                    action: RuleAction::Reject,
                }],
            })
            .await
            .unwrap();

        let mut cfg = executor.config.clone();
        cfg.price_table.cpu_core_hour = 0.05;
        cfg.price_table.gpu_hour.insert(GpuSku::L4, 0.60);
        let executor = PlanExecutorApi { config: cfg, ..executor };

        let plan = scale_plan(PlanMode::Enforce, workload_id, cluster_id, 10);
        let result = executor.submit_action_plan(plan).await.unwrap();
        assert_eq!(result.status, PlanStatus::Rejected);
        assert!(!result.approved);
        assert_eq!(result.violations.len(), 1);
    }

    // Scenario B (spec §8): same inputs, dry_run -> completed, approved,
    // violation recorded, no driver calls (replicas on the resource stay
    // at the pre-plan value).
    #[tokio::test]
    async fn scenario_b_dry_run_completes_without_dispatch() {
        let (executor, workload_id, cluster_id, _) = make_executor().await;
        executor
            .register_policy(Policy {
                id: ResourceId::new(),
                name: "cap".into(),
                priority: 0,
                enabled: true,
                selector: Selector::default(),
                rules: vec![PolicyRule {
                    constraint: RuleConstraint::CostCeiling(CostCeilingConstraint {
                        max_usd_per_hour: 1.00,
                        cost_source: None,
                    }),
                    action: RuleAction::Reject,
                }],
            })
            .await
            .unwrap();
        let mut cfg = executor.config.clone();
        cfg.price_table.cpu_core_hour = 0.05;
        cfg.price_table.gpu_hour.insert(GpuSku::L4, 0.60);
        let executor = PlanExecutorApi { config: cfg, ..executor };

        let plan = scale_plan(PlanMode::DryRun, workload_id, cluster_id, 10);
        let result = executor.submit_action_plan(plan).await.unwrap();
        assert_eq!(result.status, PlanStatus::Completed);
        assert!(result.approved);
        assert!(result.shadow);
        assert_eq!(result.violations.len(), 1);
        assert!(result.per_decision.is_empty());
    }

    // Shadow mode (§4.3: "identical to dry_run") must approve despite a
    // reject-action violation, same as scenario B, so the executor reaches
    // the shadow short-circuit (§4.7 step 2) instead of taking the
    // `plan.rejected` branch.
    #[tokio::test]
    async fn shadow_mode_approves_despite_reject_violation() {
        let (executor, workload_id, cluster_id, _) = make_executor().await;
        executor
            .register_policy(Policy {
                id: ResourceId::new(),
                name: "cap".into(),
                priority: 0,
                enabled: true,
                selector: Selector::default(),
                rules: vec![PolicyRule {
                    constraint: RuleConstraint::CostCeiling(CostCeilingConstraint {
                        max_usd_per_hour: 1.00,
                        cost_source: None,
                    }),
                    action: RuleAction::Reject,
                }],
            })
            .await
            .unwrap();
        let mut cfg = executor.config.clone();
        cfg.price_table.cpu_core_hour = 0.05;
        cfg.price_table.gpu_hour.insert(GpuSku::L4, 0.60);
        let executor = PlanExecutorApi { config: cfg, ..executor };

        let plan = scale_plan(PlanMode::Shadow, workload_id, cluster_id, 10);
        let result = executor.submit_action_plan(plan).await.unwrap();
        assert_eq!(result.status, PlanStatus::Completed);
        assert!(result.approved);
        assert!(result.shadow);
        assert_eq!(result.violations.len(), 1);
        assert!(result.per_decision.is_empty());
    }

    #[tokio::test]
    async fn idempotent_resubmission_returns_stored_result() {
        let (executor, workload_id, cluster_id, _) = make_executor().await;
        let plan = scale_plan(PlanMode::Enforce, workload_id, cluster_id, 3);
        let first = executor.submit_action_plan(plan.clone()).await.unwrap();
        assert_eq!(first.status, PlanStatus::Completed);

        let second = executor.submit_action_plan(plan).await.unwrap();
        assert_eq!(second.plan_id, first.plan_id);
        assert_eq!(second.duration_ms, first.duration_ms);
    }

    #[tokio::test]
    async fn blast_radius_over_limit_fails_the_decision() {
        let (executor, workload_id, cluster_id, _) = make_executor().await;
        let mut plan = scale_plan(PlanMode::Enforce, workload_id, cluster_id, 100);
        plan.decisions[0].safety.max_blast_radius_percent = Some(10);

        let result = executor.submit_action_plan(plan).await.unwrap();
        assert_eq!(result.status, PlanStatus::Failed);
        assert_eq!(result.per_decision[0].outcome, DecisionOutcome::Failed);
    }

    #[tokio::test]
    async fn approval_gate_holds_until_approved() {
        let (executor, workload_id, cluster_id, _) = make_executor().await;
        let mut plan = scale_plan(PlanMode::Enforce, workload_id, cluster_id, 5);
        plan.decisions[0].safety.requires_approval = true;
        let decision_id = plan.decisions[0].id;

        let result = executor.submit_action_plan(plan).await.unwrap();
        assert_eq!(result.status, PlanStatus::AwaitingApproval);
        assert_eq!(result.per_decision[0].outcome, DecisionOutcome::AwaitingApproval);

        executor.approve_decision(decision_id);
        assert!(executor.state.is_approved(decision_id));
    }

    // §4.7 step 3: an `update` decision against a canary-strategy deployment
    // must go through the Canary Controller rather than a direct
    // `driver.update`, and complete once the rollout promotes.
    #[tokio::test]
    async fn update_on_canary_strategy_routes_through_canary_controller() {
        let (executor, workload_id, cluster_id, deployment_id) = make_executor().await;
        executor.state.update_deployment(deployment_id, |d| d.strategy = DeploymentStrategy::Canary);

        let mut cfg = executor.config.clone();
        cfg.canary_default.step_duration_seconds = 0;
        cfg.canary_default.analysis_samples = 2;
        cfg.canary_default.initial_percent = 100;
        let executor = PlanExecutorApi { config: cfg, ..executor };

        let plan = ActionPlan {
            id: ResourceId::new(),
            correlation_id: "corr-canary".into(),
            source: PlanSource::Api,
            mode: PlanMode::Enforce,
            decisions: vec![Decision {
                id: ResourceId::new(),
                target: TargetDescriptor {
                    workload_id,
                    cluster_id,
                    namespace: "ml".into(),
                    labels: HashMap::new(),
                },
                params: DecisionParams::Update(fleetguard_core::decision::UpdateParams {
                    image: "registry/infer:v2".into(),
                    cpu_cores: None,
                    memory_bytes: None,
                    gpu: None,
                }),
                safety: SafetyBlock::default(),
                timeout_seconds: None,
            }],
            status: PlanStatus::Pending,
            abort_on_first_failure: false,
            created_at: Utc::now(),
            executed_at: None,
        };

        let result = executor.submit_action_plan(plan).await.unwrap();
        assert_eq!(result.status, PlanStatus::Completed);
        assert_eq!(result.per_decision[0].outcome, DecisionOutcome::Completed);
        let deployment = executor.state.deployment(deployment_id).unwrap();
        assert!(deployment.active_canary_id.is_none());
    }
}
