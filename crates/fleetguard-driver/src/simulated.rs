//! Deterministic, in-memory `ClusterDriver` for tests and the CLI demo mode
//! (no real cluster involved). Generalizes the orchestrator-level
//! `MockExecutor` test double pattern into a full driver implementation so
//! the Canary and Rollback controllers can be exercised end-to-end without a
//! Kubernetes API server.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use fleetguard_core::Result;
use fleetguard_core::error::{DriverFault, Error};
use fleetguard_core::deployment::{
    ClusterResource, ContainerStatus, PodPhase, PodSnapshot, ResourcePatch, ResourceSpec, WatchEvent,
};
use fleetguard_core::driver::ClusterDriver;

const MANAGED_BY_LABEL: &str = "managed-by";
const MANAGED_BY_VALUE: &str = "this-system";

#[derive(Debug, Clone)]
struct RevisionSnapshot {
    replicas: u32,
    image: String,
}

struct ResourceEntry {
    resource: ClusterResource,
    history: Vec<RevisionSnapshot>,
    pods: Vec<PodSnapshot>,
}

/// Keyed by `(namespace, name)`. A single `parking_lot::Mutex` over the
/// whole map is fine here: this driver exists for tests and demos, not
/// production throughput.
pub struct SimulatedDriver {
    resources: Mutex<HashMap<(String, String), ResourceEntry>>,
    events: broadcast::Sender<WatchEvent>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            resources: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Test/demo hook: overwrite the pod snapshots backing `list_pods` for a
    /// resource directly, independent of `scale`, so callers can simulate a
    /// fleet degrading without touching replica count.
    pub fn set_pods(&self, name: &str, namespace: &str, pods: Vec<PodSnapshot>) {
        let mut resources = self.resources.lock();
        if let Some(entry) = resources.get_mut(&(namespace.to_string(), name.to_string())) {
            entry.pods = pods;
        }
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn ready_pods(replicas: u32) -> Vec<PodSnapshot> {
    let now = Utc::now();
    (0..replicas)
        .map(|i| PodSnapshot {
            name: format!("pod-{i}"),
            phase: PodPhase::Running,
            ready: true,
            restart_count: 0,
            container_statuses: vec![ContainerStatus {
                name: "main".into(),
                ready: true,
                waiting_reason: None,
            }],
            created_at: now,
        })
        .collect()
}

fn parse_label_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|kv| {
            let mut parts = kv.splitn(2, '=');
            let key = parts.next()?.trim().to_string();
            let value = parts.next()?.trim().to_string();
            Some((key, value))
        })
        .collect()
}

fn event_matches(event: &WatchEvent, namespace: &str, selector: &[(String, String)]) -> bool {
    match event {
        WatchEvent::Added(r) | WatchEvent::Modified(r) => {
            r.namespace == namespace && selector.iter().all(|(k, v)| r.labels.get(k) == Some(v))
        }
        WatchEvent::Deleted { namespace: ns, .. } => ns == namespace,
    }
}

#[async_trait]
impl ClusterDriver for SimulatedDriver {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn create(&self, spec: ResourceSpec) -> Result<ClusterResource> {
        let mut labels = spec.labels.clone();
        labels.insert("component".into(), "workload-controller".into());
        labels.insert(MANAGED_BY_LABEL.into(), MANAGED_BY_VALUE.into());
        labels.insert("workload-id".into(), spec.workload_id.to_string());

        let key = (spec.namespace.clone(), spec.name.clone());
        let mut resources = self.resources.lock();
        if let Some(existing) = resources.get(&key) {
            if existing.resource.labels.get(MANAGED_BY_LABEL).map(String::as_str) != Some(MANAGED_BY_VALUE) {
                return Err(Error::driver(
                    DriverFault::AlreadyExists,
                    format!("{}/{} exists and is not managed by this system", spec.namespace, spec.name),
                ));
            }
            return Ok(existing.resource.clone());
        }

        let resource = ClusterResource {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            replicas: spec.replicas,
            image: spec.image.clone(),
            revision: 1,
            labels,
        };
        resources.insert(
            key,
            ResourceEntry {
                resource: resource.clone(),
                history: vec![RevisionSnapshot {
                    replicas: spec.replicas,
                    image: spec.image,
                }],
                pods: ready_pods(spec.replicas),
            },
        );
        drop(resources);
        let _ = self.events.send(WatchEvent::Added(resource.clone()));
        Ok(resource)
    }

    async fn get(&self, name: &str, namespace: &str) -> Result<Option<ClusterResource>> {
        let resources = self.resources.lock();
        Ok(resources
            .get(&(namespace.to_string(), name.to_string()))
            .map(|e| e.resource.clone()))
    }

    async fn scale(&self, name: &str, namespace: &str, replicas: u32) -> Result<ClusterResource> {
        if replicas > 10_000 {
            return Err(Error::driver(DriverFault::Invalid, "replicas exceeds maximum of 10000"));
        }
        let mut resources = self.resources.lock();
        let entry = resources
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::not_found(format!("{namespace}/{name}")))?;
        entry.resource.replicas = replicas;
        entry.pods = ready_pods(replicas);
        let resource = entry.resource.clone();
        drop(resources);
        let _ = self.events.send(WatchEvent::Modified(resource.clone()));
        Ok(resource)
    }

    async fn update(&self, name: &str, namespace: &str, patch: ResourcePatch) -> Result<ClusterResource> {
        let mut resources = self.resources.lock();
        let entry = resources
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::not_found(format!("{namespace}/{name}")))?;

        if let Some(image) = patch.image {
            entry.resource.image = image;
        }
        if let Some(replicas) = patch.replicas {
            entry.resource.replicas = replicas;
            entry.pods = ready_pods(replicas);
        }
        for (k, v) in patch.annotations {
            entry.resource.labels.entry(k).or_insert(v);
        }
        entry.resource.revision += 1;
        entry.history.push(RevisionSnapshot {
            replicas: entry.resource.replicas,
            image: entry.resource.image.clone(),
        });
        let resource = entry.resource.clone();
        drop(resources);
        let _ = self.events.send(WatchEvent::Modified(resource.clone()));
        Ok(resource)
    }

    async fn rollback(&self, name: &str, namespace: &str, to_revision: Option<u64>) -> Result<ClusterResource> {
        let mut resources = self.resources.lock();
        let entry = resources
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::not_found(format!("{namespace}/{name}")))?;

        let history_len = entry.history.len();
        let snapshot = match to_revision {
            Some(rev) => entry
                .history
                .get((rev as usize).saturating_sub(1))
                .cloned()
                .ok_or_else(|| Error::driver(DriverFault::Invalid, format!("no such revision {rev}")))?,
            None => {
                if history_len < 2 {
                    return Err(Error::driver(DriverFault::Invalid, "no previous revision to roll back to"));
                }
                entry.history[history_len - 2].clone()
            }
        };

        entry.resource.image = snapshot.image.clone();
        entry.resource.replicas = snapshot.replicas;
        entry.resource.revision += 1;
        entry.history.push(snapshot);
        entry.pods = ready_pods(entry.resource.replicas);
        let resource = entry.resource.clone();
        drop(resources);
        let _ = self.events.send(WatchEvent::Modified(resource.clone()));
        Ok(resource)
    }

    async fn delete(&self, name: &str, namespace: &str, _grace_seconds: u64) -> Result<()> {
        let mut resources = self.resources.lock();
        if resources.remove(&(namespace.to_string(), name.to_string())).is_none() {
            return Err(Error::not_found(format!("{namespace}/{name}")));
        }
        drop(resources);
        let _ = self.events.send(WatchEvent::Deleted {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });
        Ok(())
    }

    async fn list_pods(&self, name: &str, namespace: &str) -> Result<Vec<PodSnapshot>> {
        let resources = self.resources.lock();
        resources
            .get(&(namespace.to_string(), name.to_string()))
            .map(|e| e.pods.clone())
            .ok_or_else(|| Error::not_found(format!("{namespace}/{name}")))
    }

    async fn watch(
        &self,
        _resource_kind: &str,
        namespace: &str,
        label_selector: &str,
    ) -> Result<BoxStream<'static, WatchEvent>> {
        let rx = self.events.subscribe();
        let namespace = namespace.to_string();
        let selector = parse_label_selector(label_selector);

        let stream = stream::unfold(rx, move |mut rx| {
            let namespace = namespace.clone();
            let selector = selector.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            if event_matches(&event, &namespace, &selector) {
                                return Some((event, rx));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetguard_core::ResourceId;

    fn spec(name: &str) -> ResourceSpec {
        ResourceSpec {
            name: name.into(),
            namespace: "default".into(),
            image: "registry/app:v1".into(),
            replicas: 2,
            workload_id: ResourceId::new(),
            labels: HashMap::new(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let driver = SimulatedDriver::new();
        let a = driver.create(spec("web")).await.unwrap();
        let b = driver.create(spec("web")).await.unwrap();
        assert_eq!(a.name, b.name);
        assert_eq!(a.revision, b.revision);
    }

    #[tokio::test]
    async fn scale_rejects_absurd_replica_counts() {
        let driver = SimulatedDriver::new();
        driver.create(spec("web")).await.unwrap();
        let err = driver.scale("web", "default", 20_000).await.unwrap_err();
        assert!(matches!(err, Error::Driver { fault: DriverFault::Invalid, .. }));
    }

    #[tokio::test]
    async fn rollback_without_revision_reverts_last_update() {
        let driver = SimulatedDriver::new();
        driver.create(spec("web")).await.unwrap();
        driver
            .update(
                "web",
                "default",
                ResourcePatch {
                    image: Some("registry/app:v2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let rolled_back = driver.rollback("web", "default", None).await.unwrap();
        assert_eq!(rolled_back.image, "registry/app:v1");
    }

    #[tokio::test]
    async fn rollback_with_no_history_fails() {
        let driver = SimulatedDriver::new();
        driver.create(spec("web")).await.unwrap();
        let err = driver.rollback("web", "default", None).await.unwrap_err();
        assert!(matches!(err, Error::Driver { fault: DriverFault::Invalid, .. }));
    }

    #[tokio::test]
    async fn list_pods_reflects_scale() {
        let driver = SimulatedDriver::new();
        driver.create(spec("web")).await.unwrap();
        driver.scale("web", "default", 5).await.unwrap();
        let pods = driver.list_pods("web", "default").await.unwrap();
        assert_eq!(pods.len(), 5);
    }

    #[tokio::test]
    async fn watch_sees_subsequent_mutations() {
        let driver = SimulatedDriver::new();
        driver.create(spec("web")).await.unwrap();
        let mut events = driver.watch("deployment", "default", "").await.unwrap();
        driver.scale("web", "default", 7).await.unwrap();
        match events.next().await {
            Some(WatchEvent::Modified(r)) => assert_eq!(r.replicas, 7),
            other => panic!("expected Modified event, got {other:?}"),
        }
    }
}
