//! Rollback Controller (C6, spec §4.6): a single long-running loop that
//! revisits monitored deployments, scores their health, and rolls back on
//! sustained degradation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use fleetguard_config::HealthWeights;
use fleetguard_core::ResourceId;
use fleetguard_core::cancel::CancelToken;
use fleetguard_core::driver::ClusterDriver;
use fleetguard_core::events::{Event, EventEnvelope, EventKind, EventSink, SequenceCounter};
use fleetguard_core::rollback::{MonitorEntry, RollbackConfig, RollbackReason, RollbackRecord};

use crate::lookup::DeploymentLookup;

const WORKER_ID: &str = "rollback-controller";

struct Tracked {
    entry: MonitorEntry,
    next_check: DateTime<Utc>,
}

/// Owns the set of monitored deployments (§5: "the set of active
/// canary/rollback monitors" is explicit process state, not a singleton).
pub struct RollbackController {
    driver: Arc<dyn ClusterDriver>,
    lookup: Arc<dyn DeploymentLookup>,
    events: Arc<dyn EventSink>,
    sequence: Arc<SequenceCounter>,
    monitored: Mutex<HashMap<ResourceId, Tracked>>,
}

impl RollbackController {
    pub fn new(
        driver: Arc<dyn ClusterDriver>,
        lookup: Arc<dyn DeploymentLookup>,
        events: Arc<dyn EventSink>,
        sequence: Arc<SequenceCounter>,
    ) -> Self {
        Self {
            driver,
            lookup,
            events,
            sequence,
            monitored: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, deployment_id: ResourceId, config: RollbackConfig, now: DateTime<Utc>) {
        let next_check = now + chrono::Duration::seconds(config.check_interval_seconds as i64);
        self.monitored.lock().insert(
            deployment_id,
            Tracked {
                entry: MonitorEntry::new(deployment_id, config),
                next_check,
            },
        );
    }

    pub fn unregister(&self, deployment_id: ResourceId) {
        self.monitored.lock().remove(&deployment_id);
    }

    pub fn is_monitored(&self, deployment_id: ResourceId) -> bool {
        self.monitored.lock().contains_key(&deployment_id)
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

    async fn check_one(&self, deployment_id: ResourceId, weights: HealthWeights, now: DateTime<Utc>) -> Option<RollbackRecord> {
        if let Some(status) = self.lookup.status(deployment_id).await {
            if status.is_terminal() {
                self.monitored.lock().remove(&deployment_id);
                return None;
            }
        }
        let Some(reference) = self.lookup.resource_ref(deployment_id).await else {
            tracing::warn!(%deployment_id, "rollback monitor: deployment not resolvable, skipping check");
            return None;
        };

        let pods = match self.driver.list_pods(&reference.name, &reference.namespace).await {
            Ok(pods) => pods,
            Err(err) => {
                tracing::warn!(%deployment_id, error = %err, "rollback monitor: list_pods failed");
                return None;
            }
        };
        let score = fleetguard_health::evaluate(&pods, reference.declared_replicas, weights, now).score;

        let triggered = {
            let mut monitored = self.monitored.lock();
            let Some(tracked) = monitored.get_mut(&deployment_id) else {
                return None;
            };
            tracked.entry.record_sample(score)
        };

        if !triggered {
            return None;
        }

        let target_revision = {
            let monitored = self.monitored.lock();
            monitored.get(&deployment_id).and_then(|t| t.entry.config.target_revision)
        };

        self.publish(EventKind::DeploymentRollbackTriggered {
            deployment_id,
            reason: RollbackReason::HealthScoreBelowThreshold,
        })
        .await;

        let before = self.driver.get(&reference.name, &reference.namespace).await.ok().flatten();
        let from_revision = before.as_ref().map(|r| r.revision).unwrap_or(0);

        let record = match self.driver.rollback(&reference.name, &reference.namespace, target_revision).await {
            Ok(resource) => {
                self.publish(EventKind::DeploymentRolledBack {
                    deployment_id,
                    to_revision: resource.revision,
                })
                .await;
                Some(RollbackRecord {
                    id: ResourceId::new(),
                    deployment_id,
                    from_revision,
                    to_revision: resource.revision,
                    reason: RollbackReason::HealthScoreBelowThreshold,
                    triggered_by: WORKER_ID.to_string(),
                    timestamp: now,
                })
            }
            Err(err) => {
                tracing::warn!(%deployment_id, error = %err, "rollback monitor: driver.rollback failed");
                None
            }
        };

        if let Some(tracked) = self.monitored.lock().get_mut(&deployment_id) {
            tracked.entry.enter_cooldown(now);
        }

        record
    }

    /// Run one pass over every monitored deployment whose `next_check` has
    /// elapsed, skipping any still in cooldown. Returns the rollback
    /// records issued this pass — callers that don't need a long-running
    /// loop (tests, a manual sweep) can drive this directly.
    pub async fn check_once(&self, weights: HealthWeights, now: DateTime<Utc>) -> Vec<RollbackRecord> {
        let due: Vec<ResourceId> = {
            let mut monitored = self.monitored.lock();
            monitored
                .iter_mut()
                .filter(|(_, tracked)| now >= tracked.next_check && !tracked.entry.in_cooldown(now))
                .map(|(id, tracked)| {
                    tracked.next_check = now + chrono::Duration::seconds(tracked.entry.config.check_interval_seconds as i64);
                    *id
                })
                .collect()
        };

        let mut records = Vec::new();
        for deployment_id in due {
            if let Some(record) = self.check_one(deployment_id, weights, now).await {
                records.push(record);
            }
        }
        records
    }

    /// Long-running monitor loop (§5: "one Rollback Controller loop per
    /// managed cluster"). Ticks at `tick` cadence until cancelled; each tick
    /// only checks deployments whose own `check_interval_seconds` is due.
    pub async fn run_forever(&self, weights: HealthWeights, tick: std::time::Duration, mut cancel: CancelToken) {
        loop {
            if cancel.race(tokio::time::sleep(tick)).await.is_err() {
                return;
            }
            self.check_once(weights, Utc::now()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleetguard_core::deployment::{ContainerStatus, PodPhase, PodSnapshot, ResourceSpec};
    use fleetguard_core::events::ChannelEventSink;
    use fleetguard_driver::SimulatedDriver;
    use std::collections::HashMap as StdHashMap;

    struct FixedLookup {
        name: String,
        namespace: String,
        declared_replicas: u32,
    }

    #[async_trait]
    impl DeploymentLookup for FixedLookup {
        async fn resource_ref(&self, _deployment_id: ResourceId) -> Option<DeploymentRef> {
            Some(DeploymentRef {
                name: self.name.clone(),
                namespace: self.namespace.clone(),
                declared_replicas: self.declared_replicas,
            })
        }

        async fn status(&self, _deployment_id: ResourceId) -> Option<fleetguard_core::deployment::DeploymentStatus> {
            Some(fleetguard_core::deployment::DeploymentStatus::Running)
        }
    }

    fn pod(ready: bool) -> PodSnapshot {
        PodSnapshot {
            name: "p".into(),
            phase: if ready { PodPhase::Running } else { PodPhase::Failed },
            ready,
            restart_count: 0,
            container_statuses: vec![ContainerStatus {
                name: "c".into(),
                ready,
                waiting_reason: None,
            }],
            created_at: Utc::now(),
        }
    }

    async fn setup() -> (Arc<SimulatedDriver>, RollbackController, ResourceId) {
        let driver = Arc::new(SimulatedDriver::new());
        driver
            .create(ResourceSpec {
                name: "web".into(),
                namespace: "default".into(),
                image: "registry/app:v1".into(),
                replicas: 3,
                workload_id: ResourceId::new(),
                labels: StdHashMap::new(),
                env: StdHashMap::new(),
            })
            .await
            .unwrap();
        driver
            .update(
                "web",
                "default",
                fleetguard_core::deployment::ResourcePatch {
                    image: Some("registry/app:v2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let lookup = Arc::new(FixedLookup {
            name: "web".into(),
            namespace: "default".into(),
            declared_replicas: 3,
        });
        let events = Arc::new(ChannelEventSink::new(256));
        let sequence = Arc::new(SequenceCounter::new());
        let deployment_id = ResourceId::new();
        let controller = RollbackController::new(driver.clone(), lookup, events, sequence);
        (driver, controller, deployment_id)
    }

    #[tokio::test]
    async fn triggers_exactly_once_after_sustained_bad_scores() {
        let (driver, controller, deployment_id) = setup().await;
        let mut config = RollbackConfig::default();
        config.check_interval_seconds = 10;
        config.consecutive_bad_threshold = 3;
        config.min_health_score = 0.70;

        let start = Utc::now();
        controller.register(deployment_id, config, start);

        let scores = [0.9, 0.5, 0.5, 0.5, 0.9];
        let mut total_triggers = 0;
        for (i, &score) in scores.iter().enumerate() {
            let now = start + chrono::Duration::seconds(10 * (i as i64 + 1));
            driver.set_pods(
                "web",
                "default",
                if score >= 0.70 { vec![pod(true), pod(true), pod(true)] } else { vec![pod(false), pod(false), pod(false)] },
            );
            let records = controller.check_once(HealthWeights::default(), now).await;
            total_triggers += records.len();
        }

        assert_eq!(total_triggers, 1);
    }

    #[tokio::test]
    async fn cooldown_suppresses_further_rollbacks() {
        let (driver, controller, deployment_id) = setup().await;
        let mut config = RollbackConfig::default();
        config.check_interval_seconds = 10;
        config.consecutive_bad_threshold = 2;
        config.cooldown_seconds = 100;
        config.min_health_score = 0.70;

        let start = Utc::now();
        controller.register(deployment_id, config, start);
        driver.set_pods("web", "default", vec![pod(false), pod(false), pod(false)]);

        let first = controller.check_once(HealthWeights::default(), start + chrono::Duration::seconds(10)).await;
        assert_eq!(first.len(), 0);
        let second = controller.check_once(HealthWeights::default(), start + chrono::Duration::seconds(20)).await;
        assert_eq!(second.len(), 1);

        // Still bad, but within cooldown: must not re-trigger.
        let third = controller.check_once(HealthWeights::default(), start + chrono::Duration::seconds(30)).await;
        assert_eq!(third.len(), 0);
    }

    #[tokio::test]
    async fn terminal_status_auto_unregisters() {
        let driver = Arc::new(SimulatedDriver::new());
        driver
            .create(ResourceSpec {
                name: "web".into(),
                namespace: "default".into(),
                image: "registry/app:v1".into(),
                replicas: 1,
                workload_id: ResourceId::new(),
                labels: StdHashMap::new(),
                env: StdHashMap::new(),
            })
            .await
            .unwrap();

        struct TerminalLookup;
        #[async_trait]
        impl DeploymentLookup for TerminalLookup {
            async fn resource_ref(&self, _deployment_id: ResourceId) -> Option<DeploymentRef> {
                Some(DeploymentRef {
                    name: "web".into(),
                    namespace: "default".into(),
                    declared_replicas: 1,
                })
            }
            async fn status(&self, _deployment_id: ResourceId) -> Option<fleetguard_core::deployment::DeploymentStatus> {
                Some(fleetguard_core::deployment::DeploymentStatus::Completed)
            }
        }

        let events = Arc::new(ChannelEventSink::new(16));
        let sequence = Arc::new(SequenceCounter::new());
        let controller = RollbackController::new(driver, Arc::new(TerminalLookup), events, sequence);
        let deployment_id = ResourceId::new();
        let now = Utc::now();
        controller.register(deployment_id, RollbackConfig::default(), now);
        controller.check_once(HealthWeights::default(), now + chrono::Duration::seconds(60)).await;
        assert!(!controller.is_monitored(deployment_id));
    }
}
