//! Policy Engine evaluation algorithm (C3, spec §4.3).

use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use fleetguard_config::PriceTable;
use fleetguard_core::ResourceId;
use fleetguard_core::decision::{Decision, DecisionParams};
use fleetguard_core::plan::{ActionPlan, PlanMode, PlanSource, Violation};
use fleetguard_core::policy::{
    ChangeFreezeConstraint, FreezeWindow, Policy, PolicyRule, RateScope, RuleAction, RuleConstraint,
};
use fleetguard_core::rate::RateScopeKey;

use crate::lookup::{AggregateScope, FleetLookup};
use crate::rate_limiter::RateLimiter;

/// Everything the engine needs beyond the plan and policy set itself: the
/// price table (§6 `price_table` option), the wall clock (threaded in
/// explicitly so evaluation is reproducible in tests, §8 determinism
/// property), and the `FleetLookup` collaborator for quota/SLA/SLO data.
pub struct EvaluationContext {
    pub price_table: PriceTable,
    pub now: DateTime<Utc>,
    pub fleet: Arc<dyn FleetLookup>,
}

/// Result of evaluating one plan against one policy snapshot (§4.3 step 4).
#[derive(Debug, Clone)]
pub struct PolicyEvaluation {
    pub approved: bool,
    pub violations: Vec<Violation>,
    pub duration_ms: u64,
    pub mode: PlanMode,
}

/// Stateless, re-entrant (§5) — the only state is the shared `RateLimiter`.
pub struct PolicyEngine {
    rate_limiter: Arc<RateLimiter>,
}

impl PolicyEngine {
    pub fn new(rate_limiter: Arc<RateLimiter>) -> Self {
        Self { rate_limiter }
    }

    /// Evaluate every decision in `plan` against `policies` (§4.3 algorithm).
    /// `policies` is expected to already be a copy-on-write snapshot taken at
    /// plan start (§5 shared-state rule); the engine does not mutate it.
    pub async fn evaluate(
        &self,
        plan: &ActionPlan,
        policies: &[Policy],
        mode: PlanMode,
        ctx: &EvaluationContext,
    ) -> PolicyEvaluation {
        let start = std::time::Instant::now();

        // Step 1: ordered policy list, descending priority, ascending name,
        // enabled only.
        let mut ordered: Vec<&Policy> = policies.iter().filter(|p| p.enabled).collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));

        let mut violations = Vec::new();
        for decision in &plan.decisions {
            let matching: Vec<&Policy> = ordered
                .iter()
                .copied()
                .filter(|p| p.selector.matches(&decision.target.labels))
                .collect();

            for policy in matching {
                for rule in &policy.rules {
                    if let Some(v) = self
                        .evaluate_rule(policy.id, rule, decision, plan.source, ctx)
                        .await
                    {
                        violations.push(v);
                    }
                }
            }
        }

        let has_reject = violations.iter().any(|v| v.action == RuleAction::Reject);
        let approved = match mode {
            // enforce: a single reject is sufficient to deny (§4.3 tie-break
            // note). dry_run/shadow always approve, violations still
            // recorded (§4.3 step 3) — shadow is "identical to dry_run" and
            // only differs in the executor choosing not to dispatch.
            PlanMode::Enforce => !has_reject,
            PlanMode::DryRun | PlanMode::Shadow => true,
        };

        PolicyEvaluation {
            approved,
            violations,
            duration_ms: start.elapsed().as_millis() as u64,
            mode,
        }
    }

    async fn evaluate_rule(
        &self,
        policy_id: ResourceId,
        rule: &PolicyRule,
        decision: &Decision,
        source: PlanSource,
        ctx: &EvaluationContext,
    ) -> Option<Violation> {
        match &rule.constraint {
            RuleConstraint::CostCeiling(c) => {
                let cost = match self.estimate_cost(decision, ctx).await {
                    Some(cost) => cost,
                    None => return Some(timeout_violation(policy_id, "cost_ceiling")),
                };
                if cost > c.max_usd_per_hour {
                    return Some(Violation {
                        policy_id,
                        rule_type: "cost_ceiling".into(),
                        action: rule.action,
                        message: format!(
                            "estimated cost {:.2}/hr exceeds ceiling {:.2}/hr",
                            cost, c.max_usd_per_hour
                        ),
                    });
                }
                None
            }
            RuleConstraint::Quota(c) => {
                let post = match self.post_state(decision, ctx).await {
                    Some(p) => p,
                    None => return Some(timeout_violation(policy_id, "quota")),
                };
                let scope_kind = AggregateScope::Namespace;
                let agg = match ctx
                    .fleet
                    .aggregate_usage(decision.target.cluster_id, &decision.target.namespace, scope_kind)
                    .await
                {
                    Some(a) => a,
                    None => return Some(timeout_violation(policy_id, "quota")),
                };

                let total_replicas = agg.replicas + post.replicas;
                let total_cpu = agg.cpu_cores + post.cpu_cores;
                let total_mem = agg.memory_bytes + post.memory_bytes;
                let total_gpu = agg.gpu_count + post.gpu_count;

                let mut reasons = Vec::new();
                if let Some(max) = c.max_replicas {
                    if total_replicas > max {
                        reasons.push(format!("replicas {total_replicas} > {max}"));
                    }
                }
                if let Some(max) = c.max_cpu_cores {
                    if total_cpu > max {
                        reasons.push(format!("cpu_cores {total_cpu} > {max}"));
                    }
                }
                if let Some(max) = c.max_memory_bytes {
                    if total_mem > max {
                        reasons.push(format!("memory_bytes {total_mem} > {max}"));
                    }
                }
                if let Some(max) = c.max_gpu_count {
                    if total_gpu > max {
                        reasons.push(format!("gpu_count {total_gpu} > {max}"));
                    }
                }

                if reasons.is_empty() {
                    None
                } else {
                    Some(Violation {
                        policy_id,
                        rule_type: "quota".into(),
                        action: rule.action,
                        message: format!("quota exceeded: {}", reasons.join(", ")),
                    })
                }
            }
            RuleConstraint::Sla(c) => {
                if !is_disruptive(decision) {
                    return None;
                }
                let uptime = match ctx.fleet.uptime_7d(decision.target.workload_id).await {
                    Some(u) => u,
                    None => return Some(timeout_violation(policy_id, "sla")),
                };
                if uptime < c.min_uptime {
                    Some(Violation {
                        policy_id,
                        rule_type: "sla".into(),
                        action: rule.action,
                        message: format!(
                            "observed 7d uptime {uptime:.4} below minimum {:.4} for a disruptive decision",
                            c.min_uptime
                        ),
                    })
                } else {
                    None
                }
            }
            RuleConstraint::Slo(c) => {
                if !self.is_scale_down(decision, ctx).await {
                    return None;
                }
                let mut reasons = Vec::new();
                if let Some(max_latency) = c.max_latency_ms_p95 {
                    match ctx.fleet.current_latency_p95_ms(decision.target.workload_id).await {
                        Some(latency) if latency > max_latency => {
                            reasons.push(format!("p95 latency {latency:.1}ms > {max_latency:.1}ms"))
                        }
                        Some(_) => {}
                        None => return Some(timeout_violation(policy_id, "slo")),
                    }
                }
                if let Some(min_success) = c.min_success_rate {
                    match ctx.fleet.current_success_rate(decision.target.workload_id).await {
                        Some(rate) if rate < min_success => {
                            reasons.push(format!("success rate {rate:.4} < {min_success:.4}"))
                        }
                        Some(_) => {}
                        None => return Some(timeout_violation(policy_id, "slo")),
                    }
                }
                if reasons.is_empty() {
                    None
                } else {
                    Some(Violation {
                        policy_id,
                        rule_type: "slo".into(),
                        action: rule.action,
                        message: format!("scale-down violates slo: {}", reasons.join(", ")),
                    })
                }
            }
            RuleConstraint::RateLimit(c) => {
                let key = rate_scope_key(policy_id, c.scope, decision);
                let allowed = self
                    .rate_limiter
                    .allow(key, c.max_actions, c.interval_seconds, ctx.now);
                if allowed {
                    None
                } else {
                    Some(Violation {
                        policy_id,
                        rule_type: "rate_limit".into(),
                        action: rule.action,
                        message: format!(
                            "rate limit exceeded: {} actions per {}s",
                            c.max_actions, c.interval_seconds
                        ),
                    })
                }
            }
            RuleConstraint::ChangeFreeze(c) => {
                if !within_freeze_window(c, ctx.now) {
                    return None;
                }
                let exempt = c
                    .exempt_sources
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(&source.to_string()));
                if exempt {
                    None
                } else {
                    Some(Violation {
                        policy_id,
                        rule_type: "change_freeze".into(),
                        action: rule.action,
                        message: format!("change freeze in effect for source '{source}'"),
                    })
                }
            }
        }
    }

    async fn estimate_cost(&self, decision: &Decision, ctx: &EvaluationContext) -> Option<f64> {
        let post = self.post_state(decision, ctx).await?;
        let gpu_rate = post
            .gpu
            .map(|g| ctx.price_table.gpu_rate(g.sku) * g.count as f64)
            .unwrap_or(0.0);
        let mem_gb = post.memory_bytes as f64 / 1_000_000_000.0;
        let per_replica =
            post.cpu_cores * ctx.price_table.cpu_core_hour + mem_gb * ctx.price_table.memory_gb_hour + gpu_rate;
        Some(post.replicas as f64 * per_replica)
    }

    /// Resolved post-decision resource profile: replica count plus the
    /// per-replica resource request that will be in effect after the
    /// decision runs (§4.3 `cost_ceiling`/`quota`).
    async fn post_state(&self, decision: &Decision, ctx: &EvaluationContext) -> Option<PostState> {
        let base = ctx.fleet.workload_resources(decision.target.workload_id).await?;
        let current_replicas = ctx
            .fleet
            .current_replicas(decision.target.workload_id, decision.target.cluster_id)
            .await;

        Some(match &decision.params {
            DecisionParams::Scale(p) => PostState {
                replicas: p.replicas,
                cpu_cores: base.cpu_cores,
                memory_bytes: base.memory_bytes,
                gpu: base.gpu,
            },
            DecisionParams::Update(p) => PostState {
                replicas: current_replicas.unwrap_or(0),
                cpu_cores: p.cpu_cores.unwrap_or(base.cpu_cores),
                memory_bytes: p.memory_bytes.unwrap_or(base.memory_bytes),
                gpu: p.gpu.or(base.gpu),
            },
            DecisionParams::Reschedule(_)
            | DecisionParams::Rollback(_)
            | DecisionParams::Drain(_)
            | DecisionParams::Restart(_) => PostState {
                replicas: current_replicas.unwrap_or(0),
                cpu_cores: base.cpu_cores,
                memory_bytes: base.memory_bytes,
                gpu: base.gpu,
            },
        })
    }

    async fn is_scale_down(&self, decision: &Decision, ctx: &EvaluationContext) -> bool {
        match &decision.params {
            DecisionParams::Scale(p) => {
                let current = ctx
                    .fleet
                    .current_replicas(decision.target.workload_id, decision.target.cluster_id)
                    .await;
                current.is_some_and(|c| p.replicas < c)
            }
            _ => false,
        }
    }
}

struct PostState {
    replicas: u32,
    cpu_cores: f64,
    memory_bytes: u64,
    gpu: Option<fleetguard_core::workload::GpuRequest>,
}

fn is_disruptive(decision: &Decision) -> bool {
    matches!(
        decision.params,
        DecisionParams::Rollback(_) | DecisionParams::Drain(_) | DecisionParams::Restart(_)
    )
}

fn rate_scope_key(policy_id: ResourceId, scope: RateScope, decision: &Decision) -> RateScopeKey {
    let resource_name = match scope {
        RateScope::Global => "*".to_string(),
        RateScope::Cluster => decision.target.cluster_id.to_string(),
        RateScope::Namespace => format!("{}/{}", decision.target.cluster_id, decision.target.namespace),
        RateScope::Workload => decision.target.workload_id.to_string(),
    };
    RateScopeKey {
        scope,
        resource_kind: decision.params.verb().to_string(),
        resource_name,
        policy_id,
    }
}

fn within_freeze_window(c: &ChangeFreezeConstraint, now: DateTime<Utc>) -> bool {
    match &c.window {
        FreezeWindow::Absolute { start, end } => now >= *start && now <= *end,
        FreezeWindow::Recurring {
            days_of_week,
            hours,
            tz_offset_seconds,
        } => {
            let tz = match chrono::FixedOffset::east_opt(*tz_offset_seconds) {
                Some(tz) => tz,
                None => return false,
            };
            let local = tz.from_utc_datetime(&now.naive_utc());
            days_of_week.contains(&local.weekday()) && hours.contains(&(local.hour() as u8))
        }
    }
}

fn timeout_violation(policy_id: ResourceId, rule_type: &str) -> Violation {
    // §4.3 failure semantics: lookup timeouts/unavailable data become a
    // `evaluation_timeout` violation with action=warn, never an auto-reject.
    Violation {
        policy_id,
        rule_type: "evaluation_timeout".into(),
        action: RuleAction::Warn,
        message: format!("evaluation data unavailable for {rule_type} rule"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleetguard_core::decision::{ScaleParams, SafetyBlock, TargetDescriptor};
    use fleetguard_core::policy::{CostCeilingConstraint, Selector};
    use fleetguard_core::workload::{GpuRequest, GpuSku, ResourceRequest};
    use std::collections::HashMap;

    struct FixedLookup {
        resources: ResourceRequest,
    }

    #[async_trait]
    impl FleetLookup for FixedLookup {
        async fn workload_resources(&self, _workload_id: ResourceId) -> Option<ResourceRequest> {
            Some(self.resources)
        }
        async fn current_replicas(&self, _workload_id: ResourceId, _cluster_id: ResourceId) -> Option<u32> {
            Some(2)
        }
        async fn aggregate_usage(
            &self,
            _cluster_id: ResourceId,
            _namespace: &str,
            _scope: AggregateScope,
        ) -> Option<crate::lookup::AggregateUsage> {
            Some(crate::lookup::AggregateUsage::default())
        }
        async fn uptime_7d(&self, _workload_id: ResourceId) -> Option<f64> {
            Some(1.0)
        }
        async fn current_latency_p95_ms(&self, _workload_id: ResourceId) -> Option<f64> {
            Some(0.0)
        }
        async fn current_success_rate(&self, _workload_id: ResourceId) -> Option<f64> {
            Some(1.0)
        }
    }

    fn plan_with_scale(replicas: u32) -> ActionPlan {
        let decision = Decision {
            id: ResourceId::new(),
            target: TargetDescriptor {
                workload_id: ResourceId::new(),
                cluster_id: ResourceId::new(),
                namespace: "ml".into(),
                labels: HashMap::new(),
            },
            params: DecisionParams::Scale(ScaleParams { replicas }),
            safety: SafetyBlock::default(),
            timeout_seconds: None,
        };
        ActionPlan {
            id: ResourceId::new(),
            correlation_id: "corr-1".into(),
            source: PlanSource::Api,
            mode: PlanMode::Enforce,
            decisions: vec![decision],
            status: fleetguard_core::plan::PlanStatus::Pending,
            abort_on_first_failure: false,
            created_at: Utc::now(),
            executed_at: None,
        }
    }

    fn cost_ceiling_policy(max_usd_per_hour: f64, action: RuleAction) -> Policy {
        Policy {
            id: ResourceId::new(),
            name: "cap".into(),
            priority: 0,
            enabled: true,
            selector: Selector::default(),
            rules: vec![PolicyRule {
                constraint: RuleConstraint::CostCeiling(CostCeilingConstraint {
                    max_usd_per_hour,
                    cost_source: None,
                }),
                action,
            }],
        }
    }

    fn price_table() -> PriceTable {
        let mut table = PriceTable::default();
        table.cpu_core_hour = 0.05;
        table.gpu_hour.insert(GpuSku::L4, 0.60);
        table
    }

    // Scenario A (spec.md §8): cost ceiling of $1.00/hr, scale to
    // replicas=10, cpu=2, gpu=1xL4 -> estimated cost 7.00, rejected.
    #[tokio::test]
    async fn scenario_a_cost_ceiling_rejects() {
        let engine = PolicyEngine::new(Arc::new(RateLimiter::new()));
        let plan = plan_with_scale(10);
        let policies = vec![cost_ceiling_policy(1.00, RuleAction::Reject)];
        let ctx = EvaluationContext {
            price_table: price_table(),
            now: Utc::now(),
            fleet: Arc::new(FixedLookup {
                resources: ResourceRequest {
                    cpu_cores: 2.0,
                    memory_bytes: 0,
                    gpu: Some(GpuRequest {
                        count: 1,
                        sku: GpuSku::L4,
                    }),
                },
            }),
        };

        let result = engine.evaluate(&plan, &policies, PlanMode::Enforce, &ctx).await;
        assert!(!result.approved);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].rule_type, "cost_ceiling");
        assert!(result.violations[0].message.contains("7.00"));
    }

    // Scenario B: same inputs, dry_run mode -> approved, violation recorded.
    #[tokio::test]
    async fn scenario_b_dry_run_approves_but_records() {
        let engine = PolicyEngine::new(Arc::new(RateLimiter::new()));
        let plan = plan_with_scale(10);
        let policies = vec![cost_ceiling_policy(1.00, RuleAction::Reject)];
        let ctx = EvaluationContext {
            price_table: price_table(),
            now: Utc::now(),
            fleet: Arc::new(FixedLookup {
                resources: ResourceRequest {
                    cpu_cores: 2.0,
                    memory_bytes: 0,
                    gpu: Some(GpuRequest {
                        count: 1,
                        sku: GpuSku::L4,
                    }),
                },
            }),
        };

        let result = engine.evaluate(&plan, &policies, PlanMode::DryRun, &ctx).await;
        assert!(result.approved);
        assert_eq!(result.violations.len(), 1);
    }

    #[tokio::test]
    async fn empty_policy_set_always_approves() {
        let engine = PolicyEngine::new(Arc::new(RateLimiter::new()));
        let plan = plan_with_scale(5);
        let ctx = EvaluationContext {
            price_table: PriceTable::default(),
            now: Utc::now(),
            fleet: Arc::new(crate::lookup::NullFleetLookup),
        };
        let result = engine.evaluate(&plan, &[], PlanMode::Enforce, &ctx).await;
        assert!(result.approved);
        assert!(result.violations.is_empty());
    }

    // Scenario F: recurring Sat/Sun UTC freeze, exempt_sources=[bridge].
    #[tokio::test]
    async fn scenario_f_change_freeze_blocks_unless_exempt() {
        let engine = PolicyEngine::new(Arc::new(RateLimiter::new()));
        let policy = Policy {
            id: ResourceId::new(),
            name: "freeze".into(),
            priority: 0,
            enabled: true,
            selector: Selector::default(),
            rules: vec![PolicyRule {
                constraint: RuleConstraint::ChangeFreeze(ChangeFreezeConstraint {
                    window: FreezeWindow::Recurring {
                        days_of_week: vec![chrono::Weekday::Sat, chrono::Weekday::Sun],
                        hours: (0..24).collect(),
                        tz_offset_seconds: 0,
                    },
                    exempt_sources: vec!["bridge".into()],
                }),
                action: RuleAction::Reject,
            }],
        };
        // Saturday 2024-01-06 12:00:00 UTC.
        let saturday_noon = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
        let ctx = EvaluationContext {
            price_table: PriceTable::default(),
            now: saturday_noon,
            fleet: Arc::new(crate::lookup::NullFleetLookup),
        };

        let mut plan = plan_with_scale(3);
        plan.source = PlanSource::Api;
        let result = engine.evaluate(&plan, &[policy.clone()], PlanMode::Enforce, &ctx).await;
        assert!(!result.approved);

        plan.source = PlanSource::Bridge;
        let result = engine.evaluate(&plan, &[policy], PlanMode::Enforce, &ctx).await;
        assert!(result.approved);
    }

    #[tokio::test]
    async fn evaluation_is_deterministic_for_same_inputs() {
        let engine = PolicyEngine::new(Arc::new(RateLimiter::new()));
        let plan = plan_with_scale(10);
        let policies = vec![cost_ceiling_policy(1.00, RuleAction::Reject)];
        let fleet: Arc<dyn FleetLookup> = Arc::new(FixedLookup {
            resources: ResourceRequest {
                cpu_cores: 2.0,
                memory_bytes: 0,
                gpu: Some(GpuRequest {
                    count: 1,
                    sku: GpuSku::L4,
                }),
            },
        });
        let now = Utc::now();
        let ctx1 = EvaluationContext {
            price_table: price_table(),
            now,
            fleet: fleet.clone(),
        };
        let ctx2 = EvaluationContext {
            price_table: price_table(),
            now,
            fleet,
        };
        let r1 = engine.evaluate(&plan, &policies, PlanMode::Enforce, &ctx1).await;
        let r2 = engine.evaluate(&plan, &policies, PlanMode::Enforce, &ctx2).await;
        assert_eq!(r1.approved, r2.approved);
        assert_eq!(r1.violations.len(), r2.violations.len());
    }
}
