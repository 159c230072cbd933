//! `ClusterDriver` backed by a live Kubernetes API server (§4.1), modeling
//! workloads as apps/v1 `Deployment`s.
//!
//! Kubernetes Deployments don't expose revision history directly — `kubectl
//! rollout undo` works by walking the owned `ReplicaSet`s for the
//! `deployment.kubernetes.io/revision` annotation kept by the deployment
//! controller and reapplying that ReplicaSet's pod template. `rollback`
//! below does the same thing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec as K8sDeploymentSpec, ReplicaSet};
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::watcher;
use kube::{Api, Client};

use fleetguard_core::Result;
use fleetguard_core::error::{DriverFault, Error};
use fleetguard_core::deployment::{
    ClusterResource, ContainerStatus, PodPhase, PodSnapshot, ResourcePatch, ResourceSpec, WaitingReason, WatchEvent,
};
use fleetguard_core::driver::ClusterDriver;

use crate::retry::{retry_transient, BackoffPolicy};

pub const MANAGED_BY_LABEL: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "this-system";
const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

pub struct KubernetesDriver {
    client: Client,
    backoff: BackoffPolicy,
}

impl KubernetesDriver {
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.map_err(map_kube_error)?;
        Ok(Self {
            client,
            backoff: BackoffPolicy::default(),
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            backoff: BackoffPolicy::default(),
        }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn replica_sets(&self, namespace: &str) -> Api<ReplicaSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_kube_error(err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(resp) => match resp.code {
            404 => Error::driver(DriverFault::NotFound, resp.message.clone()),
            409 => Error::driver(DriverFault::AlreadyExists, resp.message.clone()),
            408 | 429 | 500..=599 => Error::driver(DriverFault::ClusterUnavailable, resp.message.clone()),
            _ => Error::driver(DriverFault::Invalid, resp.message.clone()),
        },
        _ => Error::driver(DriverFault::ClusterTimeout, err.to_string()),
    }
}

fn build_deployment(spec: &ResourceSpec, labels: &std::collections::HashMap<String, String>) -> Deployment {
    let match_labels: BTreeMap<String, String> = [("workload-id".to_string(), spec.workload_id.to_string())]
        .into_iter()
        .collect();
    let all_labels: BTreeMap<String, String> = labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let env: Vec<EnvVar> = spec
        .env
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            value_from: None,
        })
        .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(all_labels),
            ..Default::default()
        },
        spec: Some(K8sDeploymentSpec {
            replicas: Some(spec.replicas as i32),
            selector: LabelSelector {
                match_labels: Some(match_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(match_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: spec.name.clone(),
                        image: Some(spec.image.clone()),
                        env: Some(env),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn to_cluster_resource(deployment: &Deployment) -> Result<ClusterResource> {
    let name = deployment
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::Internal("deployment missing metadata.name".into()))?;
    let namespace = deployment.metadata.namespace.clone().unwrap_or_default();
    let replicas = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0)
        .max(0) as u32;
    let image = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();
    let revision = deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(REVISION_ANNOTATION))
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let labels = deployment
        .metadata
        .labels
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();
    Ok(ClusterResource {
        name,
        namespace,
        replicas,
        image,
        revision,
        labels,
    })
}

fn phase_from_str(s: &str) -> PodPhase {
    match s {
        "Pending" => PodPhase::Pending,
        "Running" => PodPhase::Running,
        "Succeeded" => PodPhase::Succeeded,
        "Failed" => PodPhase::Failed,
        _ => PodPhase::Unknown,
    }
}

fn waiting_reason_from(reason: &str) -> WaitingReason {
    match reason {
        "CrashLoopBackOff" => WaitingReason::CrashLoopBackOff,
        "ImagePullBackOff" => WaitingReason::ImagePullBackOff,
        "ErrImagePull" => WaitingReason::ErrImagePull,
        "CreateContainerError" => WaitingReason::CreateContainerError,
        _ => WaitingReason::Other,
    }
}

fn to_pod_snapshot(pod: &Pod) -> PodSnapshot {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let created_at = pod
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or_else(chrono::Utc::now);
    let status = pod.status.as_ref();
    let phase = status
        .and_then(|s| s.phase.as_deref())
        .map(phase_from_str)
        .unwrap_or(PodPhase::Unknown);

    let container_statuses: Vec<ContainerStatus> = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| ContainerStatus {
                    name: cs.name.clone(),
                    ready: cs.ready,
                    waiting_reason: cs
                        .state
                        .as_ref()
                        .and_then(|st| st.waiting.as_ref())
                        .and_then(|w| w.reason.as_deref())
                        .map(waiting_reason_from),
                })
                .collect()
        })
        .unwrap_or_default();

    let restart_count = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|cs| cs.restart_count.max(0) as u32).sum())
        .unwrap_or(0);

    let ready = !container_statuses.is_empty() && container_statuses.iter().all(|c| c.ready);

    PodSnapshot {
        name,
        phase,
        ready,
        restart_count,
        container_statuses,
        created_at,
    }
}

#[async_trait]
impl ClusterDriver for KubernetesDriver {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn create(&self, spec: ResourceSpec) -> Result<ClusterResource> {
        let api = self.deployments(&spec.namespace);

        if let Some(existing) = api.get_opt(&spec.name).await.map_err(map_kube_error)? {
            let managed = existing
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(MANAGED_BY_LABEL))
                .map(|v| v == MANAGED_BY_VALUE)
                .unwrap_or(false);
            if !managed {
                return Err(Error::driver(
                    DriverFault::AlreadyExists,
                    format!("{}/{} exists and is not managed by this system", spec.namespace, spec.name),
                ));
            }
            return to_cluster_resource(&existing);
        }

        let mut labels = spec.labels.clone();
        labels.insert("component".into(), "workload-controller".into());
        labels.insert(MANAGED_BY_LABEL.into(), MANAGED_BY_VALUE.into());
        labels.insert("workload-id".into(), spec.workload_id.to_string());
        let deployment = build_deployment(&spec, &labels);

        let created = retry_transient(&self.backoff, || {
            let api = api.clone();
            let deployment = deployment.clone();
            async move { api.create(&PostParams::default(), &deployment).await.map_err(map_kube_error) }
        })
        .await?;

        to_cluster_resource(&created)
    }

    async fn get(&self, name: &str, namespace: &str) -> Result<Option<ClusterResource>> {
        let api = self.deployments(namespace);
        match api.get_opt(name).await.map_err(map_kube_error)? {
            Some(d) => Ok(Some(to_cluster_resource(&d)?)),
            None => Ok(None),
        }
    }

    async fn scale(&self, name: &str, namespace: &str, replicas: u32) -> Result<ClusterResource> {
        if replicas > 10_000 {
            return Err(Error::driver(DriverFault::Invalid, "replicas exceeds maximum of 10000"));
        }
        let api = self.deployments(namespace);
        let merge = serde_json::json!({ "spec": { "replicas": replicas } });

        let updated = retry_transient(&self.backoff, || {
            let api = api.clone();
            let merge = merge.clone();
            async move {
                api.patch(name, &PatchParams::default(), &Patch::Merge(&merge))
                    .await
                    .map_err(map_kube_error)
            }
        })
        .await?;

        to_cluster_resource(&updated)
    }

    async fn update(&self, name: &str, namespace: &str, patch: ResourcePatch) -> Result<ClusterResource> {
        let api = self.deployments(namespace);

        let mut spec = serde_json::Map::new();
        if let Some(replicas) = patch.replicas {
            spec.insert("replicas".into(), serde_json::json!(replicas));
        }
        if let Some(image) = &patch.image {
            spec.insert(
                "template".into(),
                serde_json::json!({ "spec": { "containers": [{ "name": name, "image": image }] } }),
            );
        }
        let mut body = serde_json::Map::new();
        if !spec.is_empty() {
            body.insert("spec".into(), serde_json::Value::Object(spec));
        }
        if !patch.annotations.is_empty() {
            body.insert("metadata".into(), serde_json::json!({ "annotations": patch.annotations }));
        }
        let merge = serde_json::Value::Object(body);

        let updated = retry_transient(&self.backoff, || {
            let api = api.clone();
            let merge = merge.clone();
            async move {
                api.patch(name, &PatchParams::default(), &Patch::Merge(&merge))
                    .await
                    .map_err(map_kube_error)
            }
        })
        .await?;

        to_cluster_resource(&updated)
    }

    async fn rollback(&self, name: &str, namespace: &str, to_revision: Option<u64>) -> Result<ClusterResource> {
        let deployment = self.deployments(namespace).get(name).await.map_err(map_kube_error)?;
        let owner_uid = deployment.metadata.uid.clone();

        let list = self
            .replica_sets(namespace)
            .list(&ListParams::default())
            .await
            .map_err(map_kube_error)?;

        let mut revisions: Vec<(u64, ReplicaSet)> = list
            .items
            .into_iter()
            .filter(|rs| {
                rs.metadata
                    .owner_references
                    .as_ref()
                    .is_some_and(|refs| refs.iter().any(|r| Some(&r.uid) == owner_uid.as_ref()))
            })
            .filter_map(|rs| {
                let rev = rs
                    .metadata
                    .annotations
                    .as_ref()?
                    .get(REVISION_ANNOTATION)?
                    .parse::<u64>()
                    .ok()?;
                Some((rev, rs))
            })
            .collect();
        revisions.sort_by_key(|(rev, _)| *rev);

        let current_revision = revisions.last().map(|(rev, _)| *rev).unwrap_or(0);
        let target = match to_revision {
            Some(rev) => revisions.iter().find(|(r, _)| *r == rev),
            None => revisions.iter().rev().find(|(r, _)| *r != current_revision),
        }
        .ok_or_else(|| Error::driver(DriverFault::Invalid, "no previous revision available to roll back to"))?;

        let template = target
            .1
            .spec
            .as_ref()
            .and_then(|s| s.template.clone())
            .ok_or_else(|| Error::driver(DriverFault::Invalid, "target revision has no pod template"))?;

        let merge = serde_json::json!({ "spec": { "template": template } });
        let updated = retry_transient(&self.backoff, || {
            let api = self.deployments(namespace);
            let merge = merge.clone();
            async move {
                api.patch(name, &PatchParams::default(), &Patch::Merge(&merge))
                    .await
                    .map_err(map_kube_error)
            }
        })
        .await?;

        to_cluster_resource(&updated)
    }

    async fn delete(&self, name: &str, namespace: &str, grace_seconds: u64) -> Result<()> {
        let api = self.deployments(namespace);
        let params = DeleteParams {
            grace_period_seconds: Some(grace_seconds as u32),
            ..Default::default()
        };

        retry_transient(&self.backoff, || {
            let api = api.clone();
            let params = params.clone();
            async move { api.delete(name, &params).await.map(|_| ()).map_err(map_kube_error) }
        })
        .await
    }

    async fn list_pods(&self, name: &str, namespace: &str) -> Result<Vec<PodSnapshot>> {
        let deployment = self.deployments(namespace).get(name).await.map_err(map_kube_error)?;
        let selector = deployment
            .spec
            .as_ref()
            .and_then(|s| s.selector.match_labels.clone())
            .unwrap_or_default();
        let label_selector = selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(&label_selector))
            .await
            .map_err(map_kube_error)?;
        Ok(pods.items.iter().map(to_pod_snapshot).collect())
    }

    async fn watch(
        &self,
        resource_kind: &str,
        namespace: &str,
        label_selector: &str,
    ) -> Result<BoxStream<'static, WatchEvent>> {
        // Deployments are the only resource kind this driver watches today;
        // the parameter stays for trait symmetry with other `ClusterDriver`
        // implementations that may cover pods/jobs as well.
        let _ = resource_kind;

        let api = self.deployments(namespace);
        let config = watcher::Config::default().labels(label_selector);

        let stream = watcher::watcher(api, config).filter_map(|event| async move {
            match event {
                Ok(watcher::Event::Apply(d)) | Ok(watcher::Event::InitApply(d)) => {
                    to_cluster_resource(&d).ok().map(WatchEvent::Modified)
                }
                Ok(watcher::Event::Delete(d)) => Some(WatchEvent::Deleted {
                    name: d.metadata.name.unwrap_or_default(),
                    namespace: d.metadata.namespace.unwrap_or_default(),
                }),
                Ok(_) => None,
                // kube's watcher retries internally with its own backoff;
                // transient errors never terminate the stream for callers.
                Err(_) => None,
            }
        });

        Ok(stream.boxed())
    }
}
