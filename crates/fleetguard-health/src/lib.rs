//! Health Evaluator (spec §4.2, component C2).
//!
//! Pure given its inputs: no external calls, no retries, no mutable state.
//! Computes a `[0.0, 1.0]` score and a coarse status from pod snapshots.

use chrono::{DateTime, Utc};

use fleetguard_config::HealthWeights;
use fleetguard_core::deployment::{PodPhase, PodSnapshot};

/// Coarse health classification derived from the numeric score (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Score plus status, returned by `evaluate` (§4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthAssessment {
    pub score: f64,
    pub status: HealthStatus,
}

fn status_for(score: f64, total_pods: usize, declared_replicas: u32) -> HealthStatus {
    if total_pods == 0 && declared_replicas > 0 {
        return HealthStatus::Unknown;
    }
    if score >= 0.85 {
        HealthStatus::Healthy
    } else if score >= 0.60 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

/// Evaluate a deployment's health from its pod snapshots and declared
/// replica count (§4.2).
///
/// `now` is passed explicitly (rather than read from the clock) so the
/// "recent restart" window and tests are both deterministic.
pub fn evaluate(
    pods: &[PodSnapshot],
    declared_replicas: u32,
    weights: HealthWeights,
    now: DateTime<Utc>,
) -> HealthAssessment {
    let total_pods = pods.len();

    if total_pods == 0 && declared_replicas == 0 {
        return HealthAssessment {
            score: 1.0,
            status: HealthStatus::Healthy,
        };
    }

    if total_pods == 0 {
        return HealthAssessment {
            score: 0.0,
            status: HealthStatus::Unknown,
        };
    }

    let ready_pods = pods.iter().filter(|p| p.ready).count();
    let ready_fraction =
        ready_pods as f64 / (declared_replicas as usize).max(total_pods) as f64;

    let recent_window = chrono::Duration::minutes(30);
    let recent_restarts: Vec<u32> = pods
        .iter()
        .filter(|p| now - p.created_at <= recent_window)
        .map(|p| p.restart_count)
        .collect();
    let mean_recent_restarts = if recent_restarts.is_empty() {
        0.0
    } else {
        recent_restarts.iter().sum::<u32>() as f64 / recent_restarts.len() as f64
    };
    let restart_penalty = (mean_recent_restarts / 5.0).min(1.0);

    let bad_state_pods = pods
        .iter()
        .filter(|p| {
            p.container_statuses
                .iter()
                .any(|c| c.waiting_reason.is_some_and(|r| r.is_bad_state()))
        })
        .count();
    let bad_state_fraction = bad_state_pods as f64 / total_pods as f64;

    let score = weights.ready * ready_fraction
        + weights.restart * (1.0 - restart_penalty)
        + weights.bad_state * (1.0 - bad_state_fraction);
    let score = score.clamp(0.0, 1.0);

    HealthAssessment {
        score,
        status: status_for(score, total_pods, declared_replicas),
    }
}

/// Convenience wrapper matching spec.md's `PodPhase::Unknown` treatment when
/// sampling for the Canary Controller (§4.5): an unknown-phase pod never
/// counts as ready.
pub fn is_unready_unknown(phase: PodPhase) -> bool {
    matches!(phase, PodPhase::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetguard_core::deployment::{ContainerStatus, WaitingReason};
    use proptest::prelude::*;

    fn pod(ready: bool, restart_count: u32, created_at: DateTime<Utc>) -> PodSnapshot {
        PodSnapshot {
            name: "p".into(),
            phase: if ready { PodPhase::Running } else { PodPhase::Pending },
            ready,
            restart_count,
            container_statuses: vec![ContainerStatus {
                name: "c".into(),
                ready,
                waiting_reason: None,
            }],
            created_at,
        }
    }

    #[test]
    fn zero_pods_zero_replicas_is_healthy_by_vacuity() {
        let now = Utc::now();
        let a = evaluate(&[], 0, HealthWeights::default(), now);
        assert_eq!(a.score, 1.0);
        assert_eq!(a.status, HealthStatus::Healthy);
    }

    #[test]
    fn zero_observed_pods_with_replicas_is_unknown() {
        let now = Utc::now();
        let a = evaluate(&[], 3, HealthWeights::default(), now);
        assert_eq!(a.status, HealthStatus::Unknown);
    }

    #[test]
    fn all_ready_no_restarts_is_healthy() {
        let now = Utc::now();
        let pods = vec![pod(true, 0, now), pod(true, 0, now), pod(true, 0, now)];
        let a = evaluate(&pods, 3, HealthWeights::default(), now);
        assert!((a.score - 1.0).abs() < 1e-9);
        assert_eq!(a.status, HealthStatus::Healthy);
    }

    #[test]
    fn crash_loop_containers_drag_score_down() {
        let now = Utc::now();
        let mut bad = pod(false, 0, now);
        bad.container_statuses[0].waiting_reason = Some(WaitingReason::CrashLoopBackOff);
        let a = evaluate(&[bad], 1, HealthWeights::default(), now);
        assert!(a.score < 0.6);
        assert_eq!(a.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn old_restarts_outside_window_are_not_penalized() {
        let now = Utc::now();
        let old = now - chrono::Duration::hours(2);
        let pods = vec![pod(true, 10, old)];
        let a = evaluate(&pods, 1, HealthWeights::default(), now);
        assert!((a.score - 1.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn score_is_monotonic_in_ready_pods(
            declared in 1u32..10,
            total in 1usize..10,
            ready_first in 0usize..10,
        ) {
            let now = Utc::now();
            let ready_first = ready_first.min(total);
            let ready_second = (ready_first + 1).min(total);

            let build = |ready_count: usize| -> Vec<PodSnapshot> {
                (0..total)
                    .map(|i| pod(i < ready_count, 0, now))
                    .collect()
            };

            let a1 = evaluate(&build(ready_first), declared, HealthWeights::default(), now);
            let a2 = evaluate(&build(ready_second), declared, HealthWeights::default(), now);
            prop_assert!(a2.score >= a1.score - 1e-9);
        }
    }
}
