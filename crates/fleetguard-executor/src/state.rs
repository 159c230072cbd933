//! In-memory registry of workloads, clusters, deployments, policies, plan
//! results and active canaries — the state a Plan Executor needs to answer
//! `ControllerApi` queries, and the backing store for the `FleetLookup`/
//! `DeploymentLookup` collaborators the Policy Engine and Rollback
//! Controller consult.
//!
//! Persistence is an external collaborator (spec §1); this is a stand-in
//! suitable for the CLI demo mode and for tests, not a production store —
//! a real deployment would swap `ControllerState` for a database-backed
//! implementation of the same two lookup traits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use fleetguard_core::ResourceId;
use fleetguard_core::canary::{CanaryObserver, CanaryState};
use fleetguard_core::cancel::CancelSource;
use fleetguard_core::deployment::{Deployment, DeploymentStatus, ResourceSpec};
use fleetguard_core::plan::PlanResult;
use fleetguard_core::policy::Policy;
use fleetguard_core::workload::{Cluster, ResourceRequest, Workload};

use fleetguard_policy::{AggregateScope, AggregateUsage, FleetLookup};
use fleetguard_rollback::{DeploymentLookup, DeploymentRef};

#[derive(Default)]
pub struct ControllerState {
    workloads: RwLock<HashMap<ResourceId, Workload>>,
    clusters: RwLock<HashMap<ResourceId, Cluster>>,
    deployments: RwLock<HashMap<ResourceId, Deployment>>,
    deployment_index: RwLock<HashMap<(ResourceId, ResourceId), ResourceId>>,
    policies: RwLock<HashMap<ResourceId, Policy>>,
    plans: RwLock<HashMap<ResourceId, PlanResult>>,
    approvals: RwLock<HashSet<ResourceId>>,
    canaries: RwLock<HashMap<ResourceId, CanaryState>>,
    cancels: RwLock<HashMap<ResourceId, CancelSource>>,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_workload(&self, workload: Workload) {
        self.workloads.write().insert(workload.id, workload);
    }

    pub fn put_cluster(&self, cluster: Cluster) {
        self.clusters.write().insert(cluster.id, cluster);
    }

    pub fn workload(&self, id: ResourceId) -> Option<Workload> {
        self.workloads.read().get(&id).cloned()
    }

    pub fn cluster(&self, id: ResourceId) -> Option<Cluster> {
        self.clusters.read().get(&id).cloned()
    }

    pub fn put_deployment(&self, deployment: Deployment) {
        let key = (deployment.workload_id, deployment.cluster_id);
        self.deployment_index.write().insert(key, deployment.id);
        self.deployments.write().insert(deployment.id, deployment);
    }

    pub fn deployment(&self, id: ResourceId) -> Option<Deployment> {
        self.deployments.read().get(&id).cloned()
    }

    pub fn deployment_for_target(&self, workload_id: ResourceId, cluster_id: ResourceId) -> Option<Deployment> {
        let id = *self.deployment_index.read().get(&(workload_id, cluster_id))?;
        self.deployment(id)
    }

    /// Every deployment in `scope` around `cluster_id`/`namespace` (§4.3
    /// `quota` aggregate).
    pub fn deployments_in_scope(&self, cluster_id: ResourceId, namespace: &str, scope: AggregateScope) -> Vec<Deployment> {
        self.deployments
            .read()
            .values()
            .filter(|d| d.cluster_id == cluster_id && (scope == AggregateScope::Cluster || d.namespace == namespace))
            .cloned()
            .collect()
    }

    /// Apply `f` to the deployment if it exists, bump `updated_at`, and
    /// return the post-mutation snapshot.
    pub fn update_deployment<F: FnOnce(&mut Deployment)>(&self, id: ResourceId, f: F) -> Option<Deployment> {
        let mut deployments = self.deployments.write();
        let deployment = deployments.get_mut(&id)?;
        f(deployment);
        deployment.updated_at = chrono::Utc::now();
        Some(deployment.clone())
    }

    /// The `ClusterDriver`-facing spec for a deployment's current workload
    /// (name = workload name, labels/env carried from the workload record).
    pub fn resource_spec_for(&self, deployment_id: ResourceId) -> Option<ResourceSpec> {
        let deployment = self.deployment(deployment_id)?;
        let workload = self.workload(deployment.workload_id)?;
        Some(ResourceSpec {
            name: workload.name,
            namespace: deployment.namespace,
            image: workload.image,
            replicas: deployment.replicas,
            workload_id: workload.id,
            labels: HashMap::new(),
            env: workload.env,
        })
    }

    pub fn policy(&self, id: ResourceId) -> Option<Policy> {
        self.policies.read().get(&id).cloned()
    }

    pub fn put_policy(&self, policy: Policy) -> ResourceId {
        let id = policy.id;
        self.policies.write().insert(id, policy);
        id
    }

    pub fn disable_policy(&self, id: ResourceId) -> Option<ResourceId> {
        let mut policies = self.policies.write();
        let policy = policies.get_mut(&id)?;
        policy.enabled = false;
        Some(id)
    }

    /// Copy-on-write snapshot of the registered policy set (§5 shared-state
    /// rule: taken once per plan, never mutated mid-evaluation).
    pub fn policy_snapshot(&self) -> Vec<Policy> {
        self.policies.read().values().cloned().collect()
    }

    pub fn plan_result(&self, id: ResourceId) -> Option<PlanResult> {
        self.plans.read().get(&id).cloned()
    }

    pub fn store_plan_result(&self, result: PlanResult) {
        self.plans.write().insert(result.plan_id, result);
    }

    pub fn approve(&self, decision_id: ResourceId) {
        self.approvals.write().insert(decision_id);
    }

    pub fn is_approved(&self, decision_id: ResourceId) -> bool {
        self.approvals.read().contains(&decision_id)
    }

    pub fn put_canary(&self, state: CanaryState) {
        self.canaries.write().insert(state.id, state);
    }

    pub fn canary(&self, id: ResourceId) -> Option<CanaryState> {
        self.canaries.read().get(&id).cloned()
    }

    pub fn register_cancel(&self, id: ResourceId, source: CancelSource) {
        self.cancels.write().insert(id, source);
    }

    pub fn cancel_source(&self, id: ResourceId) -> Option<CancelSource> {
        self.cancels.read().get(&id).cloned()
    }
}

/// Adapts a shared `ControllerState` to the two collaborator traits the
/// Policy Engine and Rollback Controller are built against.
pub struct StateLookup(pub Arc<ControllerState>);

#[async_trait]
impl FleetLookup for StateLookup {
    async fn workload_resources(&self, workload_id: ResourceId) -> Option<ResourceRequest> {
        self.0.workload(workload_id).map(|w| w.resources)
    }

    async fn current_replicas(&self, workload_id: ResourceId, cluster_id: ResourceId) -> Option<u32> {
        self.0.deployment_for_target(workload_id, cluster_id).map(|d| d.replicas)
    }

    async fn aggregate_usage(&self, cluster_id: ResourceId, namespace: &str, scope: AggregateScope) -> Option<AggregateUsage> {
        let mut usage = AggregateUsage::default();
        for deployment in self.0.deployments_in_scope(cluster_id, namespace, scope) {
            let Some(workload) = self.0.workload(deployment.workload_id) else {
                continue;
            };
            usage.replicas += deployment.replicas;
            usage.cpu_cores += workload.resources.cpu_cores * deployment.replicas as f64;
            usage.memory_bytes += workload.resources.memory_bytes * deployment.replicas as u64;
            if let Some(gpu) = workload.resources.gpu {
                usage.gpu_count += gpu.count * deployment.replicas;
            }
        }
        Some(usage)
    }

    // No telemetry bridge is wired into this in-memory registry (that
    // bridge is an external collaborator per spec §1); a known workload
    // reports optimistic defaults rather than "no data", so `sla`/`slo`
    // rules don't spuriously warn in the CLI demo. A real deployment
    // supplies its own `FleetLookup` backed by the telemetry scrape store.
    async fn uptime_7d(&self, workload_id: ResourceId) -> Option<f64> {
        self.0.workload(workload_id).map(|_| 1.0)
    }

    async fn current_latency_p95_ms(&self, workload_id: ResourceId) -> Option<f64> {
        self.0.workload(workload_id).map(|_| 0.0)
    }

    async fn current_success_rate(&self, workload_id: ResourceId) -> Option<f64> {
        self.0.workload(workload_id).map(|_| 1.0)
    }
}

/// Persists every intermediate `CanaryState` snapshot the controller
/// produces (§5: "CanaryState is owned by its controller instance;
/// externally observable via a read-only snapshot"), so `GetCanaryStatus`
/// reflects the in-progress phase rather than only the terminal one.
#[async_trait]
impl CanaryObserver for StateLookup {
    async fn observe(&self, state: &CanaryState) {
        self.0.put_canary(state.clone());
    }
}

#[async_trait]
impl DeploymentLookup for StateLookup {
    async fn resource_ref(&self, deployment_id: ResourceId) -> Option<DeploymentRef> {
        let deployment = self.0.deployment(deployment_id)?;
        let workload = self.0.workload(deployment.workload_id)?;
        Some(DeploymentRef {
            name: workload.name,
            namespace: deployment.namespace,
            declared_replicas: deployment.replicas,
        })
    }

    async fn status(&self, deployment_id: ResourceId) -> Option<DeploymentStatus> {
        self.0.deployment(deployment_id).map(|d| d.status)
    }
}
