//! `fleetguard demo` — the scripted end-to-end path: register a fixture
//! deployment, submit a scale plan, optionally run a canary rollout, and
//! stream the resulting events to stdout.

use std::collections::HashMap;
use std::time::Duration;

use fleetguard_config::ControllerConfig;
use fleetguard_core::ResourceId;
use fleetguard_core::api::{CanaryConfig, ControllerApi, StartCanaryRequest};
use fleetguard_core::decision::{Decision, DecisionParams, ScaleParams, SafetyBlock, TargetDescriptor};
use fleetguard_core::deployment::ResourceSpec;
use fleetguard_core::events::{Event, EventKind};
use fleetguard_core::plan::{ActionPlan, PlanMode, PlanSource, PlanStatus};

use crate::harness;

fn marker_for(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::PlanSubmitted { .. } | EventKind::CanaryStarted { .. } => "\u{25b6}",
        EventKind::PlanApproved { .. }
        | EventKind::PlanCompleted { .. }
        | EventKind::DecisionCompleted { .. }
        | EventKind::CanaryPromoted { .. }
        | EventKind::DeploymentRolledBack { .. } => "\u{2713}",
        EventKind::PlanRejected { .. }
        | EventKind::PlanFailed { .. }
        | EventKind::DecisionFailed { .. }
        | EventKind::CanaryFailed { .. } => "\u{2717}",
        EventKind::CanaryStepPromoted { .. } | EventKind::DeploymentScaled { .. } => "\u{2192}",
        EventKind::DeploymentRollbackTriggered { .. } => "!",
        _ => "\u{2022}",
    }
}

fn describe(kind: &EventKind) -> String {
    match kind {
        EventKind::PlanSubmitted { plan_id } => format!("plan {plan_id} submitted"),
        EventKind::PlanApproved { plan_id } => format!("plan {plan_id} approved"),
        EventKind::PlanRejected { plan_id, violations } => {
            format!("plan {plan_id} rejected ({} violation(s))", violations.len())
        }
        EventKind::PlanShadowExecuted { plan_id } => format!("plan {plan_id} shadow-executed"),
        EventKind::PlanCompleted { plan_id, status } => format!("plan {plan_id} completed as {status}"),
        EventKind::PlanFailed { plan_id, message } => format!("plan {plan_id} failed: {message}"),
        EventKind::PlanCancelled { plan_id } => format!("plan {plan_id} cancelled"),
        EventKind::DecisionStarted { decision_id, .. } => format!("decision {decision_id} started"),
        EventKind::DecisionCompleted { decision_id, .. } => format!("decision {decision_id} completed"),
        EventKind::DecisionFailed { decision_id, message, .. } => format!("decision {decision_id} failed: {message}"),
        EventKind::DecisionSkipped { decision_id, outcome, .. } => format!("decision {decision_id} skipped ({outcome})"),
        EventKind::CanaryStarted { canary_id, deployment_id } => {
            format!("canary {canary_id} started for deployment {deployment_id}")
        }
        EventKind::CanaryStepPromoted { canary_id, step, canary_weight } => {
            format!("canary {canary_id} step {step} -> {canary_weight}% weight")
        }
        EventKind::CanaryHealthSampled { canary_id, score } => format!("canary {canary_id} sampled score={score:.3}"),
        EventKind::CanaryPromoted { canary_id } => format!("canary {canary_id} promoted"),
        EventKind::CanaryFailed { canary_id, phase, last_score, cause } => {
            format!("canary {canary_id} failed in {phase} (last_score={last_score:.3}): {cause}")
        }
        EventKind::DeploymentCreated { deployment_id } => format!("deployment {deployment_id} created"),
        EventKind::DeploymentScaled { deployment_id, replicas } => {
            format!("deployment {deployment_id} scaled to {replicas} replicas")
        }
        EventKind::DeploymentUpdated { deployment_id } => format!("deployment {deployment_id} updated"),
        EventKind::DeploymentDeleted { deployment_id } => format!("deployment {deployment_id} deleted"),
        EventKind::DeploymentRollbackTriggered { deployment_id, reason } => {
            format!("deployment {deployment_id} rollback triggered ({reason})")
        }
        EventKind::DeploymentRolledBack { deployment_id, to_revision } => {
            format!("deployment {deployment_id} rolled back to revision {to_revision}")
        }
        EventKind::PolicyViolation { plan_id, violation } => {
            format!("plan {plan_id} policy violation: {}", violation.message)
        }
    }
}

fn print_event(event: &Event) {
    // Health samples fire once per analysis step and are debug-level in
    // `TracingEventSink`; keep the demo's stdout just as quiet.
    if matches!(event.kind, EventKind::CanaryHealthSampled { .. }) {
        return;
    }
    println!("{} {}", marker_for(&event.kind), describe(&event.kind));
}

fn scale_plan(target: &harness::DemoTarget, replicas: u32) -> ActionPlan {
    let decision = Decision {
        id: ResourceId::new(),
        target: TargetDescriptor {
            workload_id: target.workload_id,
            cluster_id: target.cluster_id,
            namespace: target.namespace.clone(),
            labels: HashMap::new(),
        },
        params: DecisionParams::Scale(ScaleParams { replicas }),
        safety: SafetyBlock::default(),
        timeout_seconds: None,
    };
    ActionPlan {
        id: ResourceId::new(),
        correlation_id: "fleetguard-cli-demo".into(),
        source: PlanSource::Operator,
        mode: PlanMode::Enforce,
        decisions: vec![decision],
        status: PlanStatus::Pending,
        abort_on_first_failure: true,
        created_at: chrono::Utc::now(),
        executed_at: None,
    }
}

pub async fn run(config: ControllerConfig, with_canary: bool) -> anyhow::Result<()> {
    let (harness, target) = harness::build_with_demo_target(config).await;
    let mut events_rx = harness.events.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            print_event(&event);
        }
    });

    println!("Submitting scale plan for {} ({})...", target.name, target.namespace);
    let plan = scale_plan(&target, 6);
    let result = harness.api.submit_action_plan(plan).await?;
    println!(
        "Plan result: status={} approved={} violations={}",
        result.status,
        result.approved,
        result.violations.len()
    );

    if with_canary {
        println!("Starting canary rollout...");
        let new_spec = ResourceSpec {
            name: target.name.clone(),
            namespace: target.namespace.clone(),
            image: "registry.example.com/inference-svc:v2".into(),
            replicas: 6,
            workload_id: target.workload_id,
            labels: HashMap::new(),
            env: HashMap::new(),
        };
        let canary_id = harness
            .api
            .start_canary(StartCanaryRequest {
                deployment_id: target.deployment_id,
                new_spec,
                config: Some(CanaryConfig {
                    step_duration_seconds: 0,
                    analysis_samples: 1,
                    ..CanaryConfig::default()
                }),
            })
            .await?;

        loop {
            let state = harness.api.get_canary_status(canary_id).await?;
            if state.phase.is_terminal() {
                println!("Canary finished in phase {}", state.phase);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    // Give the printer task a moment to drain the remaining events before
    // the sender side goes out of scope.
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    println!("Demo complete.");
    Ok(())
}
