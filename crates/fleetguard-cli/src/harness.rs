//! Wires up a throwaway in-memory controller: `ControllerState` +
//! `SimulatedDriver` + `ChannelEventSink` + `PlanExecutorApi`. No command in
//! this crate talks to a real cluster or a persistence layer — each run
//! builds this stack fresh, exercises it, and exits.

use std::collections::HashMap;
use std::sync::Arc;

use fleetguard_core::ResourceId;
use fleetguard_core::deployment::{Deployment, DeploymentStatus, DeploymentStrategy};
use fleetguard_core::driver::ClusterDriver;
use fleetguard_core::events::{ChannelEventSink, EventSink, SequenceCounter};
use fleetguard_core::workload::{Cluster, ResourceRequest, Workload, WorkloadKind};

use fleetguard_config::ControllerConfig;
use fleetguard_driver::SimulatedDriver;
use fleetguard_executor::{ControllerState, PlanExecutorApi, StateLookup};
use fleetguard_rollback::RollbackController;

/// Everything a command needs to drive the controller and observe what it
/// did.
pub struct Harness {
    pub api: PlanExecutorApi,
    pub state: Arc<ControllerState>,
    pub driver: Arc<SimulatedDriver>,
    pub events: Arc<ChannelEventSink>,
}

/// Identifiers of the fixture deployment a demo-mode harness seeds (§3
/// Workload/Cluster/Deployment), so commands can target it without
/// threading ids back out of `build`.
pub struct DemoTarget {
    pub workload_id: ResourceId,
    pub cluster_id: ResourceId,
    pub deployment_id: ResourceId,
    pub namespace: String,
    pub name: String,
}

/// Build an empty controller stack, with no workload/cluster/deployment
/// registered — used by `submit-plan`/`start-canary` where the caller's
/// JSON payload is expected to reference ids that don't yet exist in this
/// process (a real deployment would resolve them against the persistence
/// layer instead).
pub fn build(config: ControllerConfig) -> Harness {
    let state = Arc::new(ControllerState::new());
    let driver: Arc<SimulatedDriver> = Arc::new(SimulatedDriver::new());
    let events = Arc::new(ChannelEventSink::new(1024));
    let sequence = Arc::new(SequenceCounter::new());

    let driver_dyn: Arc<dyn ClusterDriver> = driver.clone();
    let events_dyn: Arc<dyn EventSink> = events.clone();
    let lookup = Arc::new(StateLookup(state.clone()));

    let rollback = Arc::new(RollbackController::new(
        driver_dyn.clone(),
        lookup,
        events_dyn.clone(),
        sequence.clone(),
    ));

    let api = PlanExecutorApi::new(state.clone(), driver_dyn, events_dyn, sequence, rollback, config);

    Harness {
        api,
        state,
        driver,
        events,
    }
}

/// Build a controller stack seeded with one workload, one cluster, and one
/// `Running` deployment, with the backing `SimulatedDriver` resource already
/// created (so `list_pods`/canary sampling have something to read).
pub async fn build_with_demo_target(config: ControllerConfig) -> (Harness, DemoTarget) {
    let harness = build(config);

    let workload = Workload {
        id: ResourceId::new(),
        name: "inference-svc".into(),
        kind: WorkloadKind::Inference,
        image: "registry.example.com/inference-svc:v1".into(),
        resources: ResourceRequest {
            cpu_cores: 1.0,
            memory_bytes: 2 * 1024 * 1024 * 1024,
            gpu: None,
        },
        env: HashMap::new(),
        config_ref: None,
    };
    let cluster = Cluster {
        id: ResourceId::new(),
        name: "demo-cluster".into(),
        connection: "simulated://demo-cluster".into(),
        labels: HashMap::new(),
        gpu_families: Vec::new(),
    };
    let namespace = "ml".to_string();
    let now = chrono::Utc::now();
    let deployment = Deployment {
        id: ResourceId::new(),
        workload_id: workload.id,
        cluster_id: cluster.id,
        namespace: namespace.clone(),
        replicas: 4,
        strategy: DeploymentStrategy::Rolling,
        canary_config: None,
        status: DeploymentStatus::Running,
        active_canary_id: None,
        created_at: now,
        updated_at: now,
    };

    let target = DemoTarget {
        workload_id: workload.id,
        cluster_id: cluster.id,
        deployment_id: deployment.id,
        namespace,
        name: workload.name.clone(),
    };

    harness.state.put_workload(workload);
    harness.state.put_cluster(cluster);
    harness.state.put_deployment(deployment);

    let spec = harness.state.resource_spec_for(target.deployment_id).expect("just-seeded deployment has a resource spec");
    harness
        .driver
        .create(spec)
        .await
        .expect("creating the fixture resource on a fresh SimulatedDriver cannot fail");

    (harness, target)
}
