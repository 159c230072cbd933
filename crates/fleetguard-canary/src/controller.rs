//! Canary Controller (C5, spec §4.5): progressive two-track rollout driving
//! a companion canary resource alongside the stable one, health-gated step
//! promotion, terminal promote or abort.

use std::sync::Arc;

use chrono::Utc;

use fleetguard_config::HealthWeights;
use fleetguard_core::Result;
use fleetguard_core::api::CanaryConfig;
use fleetguard_core::cancel::CancelToken;
use fleetguard_core::canary::{CanaryObserver, CanaryPhase, CanaryState, StepTransition};
use fleetguard_core::deployment::{ResourcePatch, ResourceSpec};
use fleetguard_core::driver::ClusterDriver;
use fleetguard_core::error::Error;
use fleetguard_core::events::{Event, EventEnvelope, EventKind, EventSink, SequenceCounter};
use fleetguard_core::ResourceId;

const WORKER_ID: &str = "canary-controller";

/// What a single canary run needs to know about the stable/canary pair it
/// is driving (§4.5: "companion canary workload alongside the stable one").
pub struct CanaryTarget {
    pub deployment_id: ResourceId,
    pub stable: ResourceSpec,
    pub canary: ResourceSpec,
    /// Assigned by the caller so a `ControllerApi::start_canary` can hand
    /// back an id synchronously while the rollout itself runs to completion
    /// on a background task (§4.7, §6 StartCanary).
    pub canary_id: ResourceId,
}

pub struct CanaryController {
    driver: Arc<dyn ClusterDriver>,
    events: Arc<dyn EventSink>,
    sequence: Arc<SequenceCounter>,
    observer: Arc<dyn CanaryObserver>,
}

impl CanaryController {
    pub fn new(
        driver: Arc<dyn ClusterDriver>,
        events: Arc<dyn EventSink>,
        sequence: Arc<SequenceCounter>,
        observer: Arc<dyn CanaryObserver>,
    ) -> Self {
        Self { driver, events, sequence, observer }
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

    /// Sample health `analysis_samples` times, one sample every
    /// `step_duration_seconds / analysis_samples`, and return the mean of
    /// the valid (non-`Unknown`) samples — `0.0` if fewer than 2 are valid
    /// (§4.5 "Health sampling").
    async fn sample_step(
        &self,
        canary_id: ResourceId,
        name: &str,
        namespace: &str,
        declared_replicas: u32,
        weights: HealthWeights,
        step_duration_seconds: u64,
        analysis_samples: u32,
        cancel: &mut CancelToken,
    ) -> Result<f64> {
        let interval = std::time::Duration::from_secs(
            (step_duration_seconds / analysis_samples.max(1) as u64).max(1),
        );
        let mut valid = Vec::new();
        for _ in 0..analysis_samples {
            match cancel.race(tokio::time::sleep(interval)).await {
                Ok(()) => {}
                Err(()) => return Err(Error::Cancelled),
            }
            let pods = self.driver.list_pods(name, namespace).await?;
            let assessment = fleetguard_health::evaluate(&pods, declared_replicas, weights, Utc::now());
            if assessment.status != fleetguard_health::HealthStatus::Unknown {
                valid.push(assessment.score);
            }
            self.publish(EventKind::CanaryHealthSampled {
                canary_id,
                score: assessment.score,
            })
            .await;
        }
        if valid.len() < 2 {
            return Ok(0.0);
        }
        Ok(valid.iter().sum::<f64>() / valid.len() as f64)
    }

    /// Drive one canary rollout to a terminal phase. Returns the final
    /// `CanaryState` snapshot; never leaves the run in a non-terminal phase
    /// even on cancellation or repeated transient driver faults within the
    /// `max_duration_seconds` deadline (§4.5 termination guarantee).
    pub async fn run(
        &self,
        target: CanaryTarget,
        config: CanaryConfig,
        weights: HealthWeights,
        mut cancel: CancelToken,
    ) -> Result<CanaryState> {
        let CanaryTarget { deployment_id, stable, canary, canary_id } = target;
        let started_at = Utc::now();
        let deadline = started_at + chrono::Duration::seconds(config.max_duration_seconds as i64);
        let pre_start_stable_replicas = stable.replicas;
        let total = pre_start_stable_replicas.max(1);

        let mut state = CanaryState {
            id: canary_id,
            deployment_id,
            phase: CanaryPhase::Initializing,
            canary_weight: 0,
            step: 0,
            last_health_score: 0.0,
            history: Vec::new(),
            started_at,
            pre_start_stable_replicas,
        };

        self.observer.observe(&state).await;
        self.publish(EventKind::CanaryStarted { canary_id, deployment_id }).await;

        let mut canary_spec = canary;
        let initial_replicas = percent_replicas(total, config.initial_percent);
        canary_spec.replicas = initial_replicas;
        if let Err(err) = self.driver.create(canary_spec.clone()).await {
            return Ok(self.fail(&mut state, &stable, &canary_spec, 0.0, err.to_string()).await);
        }
        state.canary_weight = config.initial_percent;
        self.observer.observe(&state).await;

        loop {
            if Utc::now() >= deadline {
                return Ok(self
                    .fail(&mut state, &stable, &canary_spec, state.last_health_score, "max_duration_seconds reached".into())
                    .await);
            }
            if cancel.is_cancelled() {
                return Ok(self
                    .fail(&mut state, &stable, &canary_spec, state.last_health_score, "manual abort".into())
                    .await);
            }

            let score = match self
                .sample_step(
                    canary_id,
                    &canary_spec.name,
                    &canary_spec.namespace,
                    canary_spec.replicas,
                    weights,
                    config.step_duration_seconds,
                    config.analysis_samples,
                    &mut cancel,
                )
                .await
            {
                Ok(score) => score,
                Err(Error::Cancelled) => {
                    return Ok(self
                        .fail(&mut state, &stable, &canary_spec, state.last_health_score, "manual abort".into())
                        .await);
                }
                Err(err) => {
                    return Ok(self.fail(&mut state, &stable, &canary_spec, state.last_health_score, err.to_string()).await);
                }
            };
            state.last_health_score = score;

            if score < config.min_health_score {
                return Ok(self
                    .fail(
                        &mut state,
                        &stable,
                        &canary_spec,
                        score,
                        format!("health score {score:.2} below minimum {:.2}", config.min_health_score),
                    )
                    .await);
            }

            let from_phase = state.phase;
            state.phase = if matches!(state.phase, CanaryPhase::Initializing) {
                CanaryPhase::DeployingCanary
            } else {
                CanaryPhase::Analyzing
            };

            if state.canary_weight >= 100 {
                if !config.auto_promote {
                    // Hold at full weight, continuing to sample, until the
                    // deadline or an explicit abort decides the outcome.
                    // Observe before looping so `GetCanaryStatus` reflects
                    // the held-at-100%-awaiting-promotion state rather than
                    // whatever snapshot was last persisted.
                    state.phase = CanaryPhase::Analyzing;
                    self.observer.observe(&state).await;
                    continue;
                }
                state.phase = CanaryPhase::Promoting;
                return Ok(self.promote(&mut state, &stable, &canary_spec, score).await);
            }

            state.step += 1;
            let next_percent = (state.canary_weight as u32 + config.increment_percent as u32).min(100) as u8;
            let canary_replicas = percent_replicas(total, next_percent);
            let stable_replicas = total.saturating_sub(canary_replicas);

            if let Err(err) = self.driver.scale(&canary_spec.name, &canary_spec.namespace, canary_replicas).await {
                return Ok(self.fail(&mut state, &stable, &canary_spec, score, err.to_string()).await);
            }
            if let Err(err) = self.driver.scale(&stable.name, &stable.namespace, stable_replicas).await {
                return Ok(self.fail(&mut state, &stable, &canary_spec, score, err.to_string()).await);
            }
            canary_spec.replicas = canary_replicas;
            state.canary_weight = next_percent;
            state.phase = CanaryPhase::DeployingCanary;

            state.history.push(StepTransition {
                step: state.step,
                from_phase,
                to_phase: state.phase,
                canary_weight: state.canary_weight,
                health_score: score,
                at: Utc::now(),
            });
            self.publish(EventKind::CanaryStepPromoted {
                canary_id,
                step: state.step,
                canary_weight: state.canary_weight,
            })
            .await;
            self.observer.observe(&state).await;
        }
    }

    /// Promotion is atomic at the driver level: replace stable with the
    /// canary spec first, then remove the canary resource (§4.5: "failure
    /// between create and delete leaves stable intact").
    async fn promote(
        &self,
        state: &mut CanaryState,
        stable: &ResourceSpec,
        canary: &ResourceSpec,
        score: f64,
    ) -> CanaryState {
        let patch = ResourcePatch {
            image: Some(canary.image.clone()),
            replicas: Some(state.pre_start_stable_replicas.max(canary.replicas)),
            annotations: Default::default(),
        };
        match self.driver.update(&stable.name, &stable.namespace, patch).await {
            Ok(_) => {
                if let Err(err) = self.driver.delete(&canary.name, &canary.namespace, 0).await {
                    // Stable is already promoted; the leftover canary resource is
                    // inert but not self-healing (§9 Open Question 2: no
                    // compensating action, this is the cleanup signal).
                    tracing::error!(
                        canary_id = %state.id,
                        %err,
                        "canary.promotion_incomplete: stable promoted but canary resource delete failed, manual cleanup required"
                    );
                }
            }
            Err(err) => {
                tracing::error!(
                    canary_id = %state.id,
                    %err,
                    "canary.promotion_incomplete: stable update failed during promotion, canary resource left in place"
                );
            }
        }

        state.phase = CanaryPhase::Promoted;
        state.canary_weight = 100;
        state.last_health_score = score;
        self.publish(EventKind::CanaryPromoted { canary_id: state.id }).await;
        self.observer.observe(state).await;
        state.clone()
    }

    /// Tear down the canary and restore stable to its pre-start replica
    /// count (§4.5 failure semantics).
    async fn fail(
        &self,
        state: &mut CanaryState,
        stable: &ResourceSpec,
        canary: &ResourceSpec,
        last_score: f64,
        cause: String,
    ) -> CanaryState {
        let _ = self.driver.delete(&canary.name, &canary.namespace, 0).await;
        let _ = self
            .driver
            .scale(&stable.name, &stable.namespace, state.pre_start_stable_replicas)
            .await;

        state.phase = CanaryPhase::Failed;
        state.last_health_score = last_score;
        self.publish(EventKind::CanaryFailed {
            canary_id: state.id,
            phase: state.phase,
            last_score,
            cause,
        })
        .await;
        self.observer.observe(state).await;
        state.clone()
    }
}

fn percent_replicas(total: u32, percent: u8) -> u32 {
    ((total as u64 * percent as u64 + 99) / 100) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetguard_core::canary::NullCanaryObserver;
    use fleetguard_core::deployment::{ContainerStatus, PodPhase, PodSnapshot};
    use fleetguard_core::events::ChannelEventSink;
    use fleetguard_driver::SimulatedDriver;
    use std::collections::HashMap;

    fn spec(name: &str, replicas: u32) -> ResourceSpec {
        ResourceSpec {
            name: name.into(),
            namespace: "default".into(),
            image: "registry/app:v2".into(),
            replicas,
            workload_id: ResourceId::new(),
            labels: HashMap::new(),
            env: HashMap::new(),
        }
    }

    fn fast_config() -> CanaryConfig {
        CanaryConfig {
            initial_percent: 50,
            increment_percent: 50,
            step_duration_seconds: 0,
            min_health_score: 0.85,
            analysis_samples: 2,
            max_duration_seconds: 60,
            auto_promote: true,
            abort_on_failure: true,
        }
    }

    #[tokio::test]
    async fn happy_path_reaches_promoted() {
        let driver = Arc::new(SimulatedDriver::new());
        driver.create(spec("web", 10)).await.unwrap();
        let sink = Arc::new(ChannelEventSink::new(256));
        let sequence = Arc::new(SequenceCounter::new());
        let controller = CanaryController::new(driver.clone(), sink, sequence, Arc::new(NullCanaryObserver));

        let target = CanaryTarget {
            deployment_id: ResourceId::new(),
            stable: spec("web", 10),
            canary: spec("web-canary", 0),
            canary_id: ResourceId::new(),
        };

        let state = controller
            .run(target, fast_config(), HealthWeights::default(), CancelToken::never())
            .await
            .unwrap();

        assert_eq!(state.phase, CanaryPhase::Promoted);
        assert_eq!(state.canary_weight, 100);
        assert!(driver.get("web-canary", "default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unhealthy_canary_fails_and_restores_stable() {
        let driver = Arc::new(SimulatedDriver::new());
        driver.create(spec("web", 10)).await.unwrap();
        let sink = Arc::new(ChannelEventSink::new(256));
        let sequence = Arc::new(SequenceCounter::new());
        let controller = CanaryController::new(driver.clone(), sink, sequence, Arc::new(NullCanaryObserver));

        let target = CanaryTarget {
            deployment_id: ResourceId::new(),
            stable: spec("web", 10),
            canary: spec("web-canary", 0),
            canary_id: ResourceId::new(),
        };

        // Pre-create the canary resource (idempotent with the controller's
        // own create call) so pods can be stubbed before `run` samples them:
        // no pods ever become ready, so every sample scores 0 and the run
        // must abort.
        driver.create(spec("web-canary", 5)).await.unwrap();
        driver.set_pods("web-canary", "default", vec![]);

        let state = controller
            .run(target, fast_config(), HealthWeights::default(), CancelToken::never())
            .await
            .unwrap();

        assert_eq!(state.phase, CanaryPhase::Failed);
        let stable = driver.get("web", "default").await.unwrap().unwrap();
        assert_eq!(stable.replicas, 10);
    }

    // Scenario C (spec §8): initial_percent=20, increment=20, min_health=0.85,
    // analysis_samples=3, all pods ready on every sample. `step_duration_seconds`
    // is scaled down from the spec's 60s to 0 for test speed, the same way
    // `fast_config` above scales down the default 300s — the sample interval
    // floors to 1s regardless, and no assertion here depends on wall-clock
    // duration. Expected: final canary_percent=100 and exactly 5 step
    // transitions (4 `canary.step_promoted` scale-ups from 20%->40%->60%->
    // 80%->100%, plus the terminal `canary.promoted`).
    fn scenario_c_config() -> CanaryConfig {
        CanaryConfig {
            initial_percent: 20,
            increment_percent: 20,
            step_duration_seconds: 0,
            min_health_score: 0.85,
            analysis_samples: 3,
            max_duration_seconds: 60,
            auto_promote: true,
            abort_on_failure: true,
        }
    }

    #[tokio::test]
    async fn scenario_c_canary_happy_path_five_step_transitions() {
        let driver = Arc::new(SimulatedDriver::new());
        driver.create(spec("web", 10)).await.unwrap();
        let sink = Arc::new(ChannelEventSink::new(256));
        let mut events = sink.subscribe();
        let sequence = Arc::new(SequenceCounter::new());
        let controller = CanaryController::new(driver.clone(), sink, sequence, Arc::new(NullCanaryObserver));

        let target = CanaryTarget {
            deployment_id: ResourceId::new(),
            stable: spec("web", 10),
            canary: spec("web-canary", 0),
            canary_id: ResourceId::new(),
        };

        let state = controller
            .run(target, scenario_c_config(), HealthWeights::default(), CancelToken::never())
            .await
            .unwrap();

        assert_eq!(state.phase, CanaryPhase::Promoted);
        assert_eq!(state.canary_weight, 100);
        assert_eq!(state.history.len(), 4);

        let mut step_transitions = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.kind, EventKind::CanaryStepPromoted { .. } | EventKind::CanaryPromoted { .. }) {
                step_transitions += 1;
            }
        }
        assert_eq!(step_transitions, 5);
    }

    /// Degrades the canary's pods to an all-unready, no-restart, no-bad-state
    /// snapshot the moment `state.step` reaches `trigger_step` — with the
    /// default health weights this scores exactly
    /// `0.25*(1-0) + 0.15*(1-0) = 0.4` regardless of replica count, matching
    /// Scenario D's `last_score≈0.4`.
    struct DegradeAtStep {
        driver: Arc<SimulatedDriver>,
        name: String,
        trigger_step: u32,
    }

    #[async_trait::async_trait]
    impl CanaryObserver for DegradeAtStep {
        async fn observe(&self, state: &CanaryState) {
            if state.step == self.trigger_step {
                self.driver.set_pods(&self.name, "default", vec![unready_pod()]);
            }
        }
    }

    fn unready_pod() -> PodSnapshot {
        PodSnapshot {
            name: "web-canary-0".into(),
            phase: PodPhase::Pending,
            ready: false,
            restart_count: 0,
            container_statuses: vec![ContainerStatus {
                name: "main".into(),
                ready: false,
                waiting_reason: None,
            }],
            created_at: Utc::now(),
        }
    }

    // Scenario D (spec §8): same config as Scenario C, but the canary's pods
    // go unready right after step 2 (weight 60%), so step 3's sampling scores
    // 0.4 on every sample — below `min_health_score`. Expected: transition to
    // `failed`, stable restored to its pre-start replica count, last recorded
    // score ≈0.4.
    #[tokio::test]
    async fn scenario_d_canary_aborts_on_degraded_health_at_step_three() {
        let driver = Arc::new(SimulatedDriver::new());
        driver.create(spec("web", 10)).await.unwrap();
        let sink = Arc::new(ChannelEventSink::new(256));
        let sequence = Arc::new(SequenceCounter::new());
        let observer = Arc::new(DegradeAtStep {
            driver: driver.clone(),
            name: "web-canary".into(),
            trigger_step: 2,
        });
        let controller = CanaryController::new(driver.clone(), sink, sequence, observer);

        let target = CanaryTarget {
            deployment_id: ResourceId::new(),
            stable: spec("web", 10),
            canary: spec("web-canary", 0),
            canary_id: ResourceId::new(),
        };

        let state = controller
            .run(target, scenario_c_config(), HealthWeights::default(), CancelToken::never())
            .await
            .unwrap();

        assert_eq!(state.phase, CanaryPhase::Failed);
        assert!((state.last_health_score - 0.4).abs() < 1e-9);
        let stable = driver.get("web", "default").await.unwrap().unwrap();
        assert_eq!(stable.replicas, 10);
    }
}
