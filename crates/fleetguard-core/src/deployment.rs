//! Deployment entity and pod/resource snapshots (spec.md §3, §4.1, §4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;

/// Strategy a deployment is rolled out with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    Rolling,
    Canary,
    BlueGreen,
}

impl std::fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentStrategy::Rolling => write!(f, "rolling"),
            DeploymentStrategy::Canary => write!(f, "canary"),
            DeploymentStrategy::BlueGreen => write!(f, "blue_green"),
        }
    }
}

/// Lifecycle status of a Deployment (§3 invariant: monotonic advance is
/// enforced by the owning controller, not by this type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Scaling,
    Failed,
    RollingBack,
    RolledBack,
    Completed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Failed | DeploymentStatus::RolledBack | DeploymentStatus::Completed
        )
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Scaling => "scaling",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RollingBack => "rolling_back",
            DeploymentStatus::RolledBack => "rolled_back",
            DeploymentStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Minimal canary configuration reference carried on a Deployment; the full
/// configuration lives in `fleetguard_canary::CanaryConfig` — this is the
/// subset the core data model needs to know about (§3 Deployment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryConfigRef {
    pub initial_percent: u8,
    pub increment_percent: u8,
    pub step_duration_seconds: u64,
    pub min_health_score: f64,
    pub analysis_samples: u32,
    pub max_duration_seconds: u64,
    pub auto_promote: bool,
    pub abort_on_failure: bool,
}

impl Default for CanaryConfigRef {
    fn default() -> Self {
        Self {
            initial_percent: 10,
            increment_percent: 10,
            step_duration_seconds: 300,
            min_health_score: 0.85,
            analysis_samples: 3,
            max_duration_seconds: 3600,
            auto_promote: true,
            abort_on_failure: true,
        }
    }
}

/// The live instance of a workload on a cluster (§3 Deployment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: ResourceId,
    pub workload_id: ResourceId,
    pub cluster_id: ResourceId,
    pub namespace: String,
    pub replicas: u32,
    pub strategy: DeploymentStrategy,
    pub canary_config: Option<CanaryConfigRef>,
    pub status: DeploymentStatus,
    /// Lookup, not ownership — see Design Notes §9 on the Canary/Deployment
    /// relationship.
    pub active_canary_id: Option<ResourceId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a single container within a pod (§4.1 `list_pods`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub ready: bool,
    pub waiting_reason: Option<WaitingReason>,
}

/// Container waiting reasons the Health Evaluator treats as "bad state"
/// (§4.2 `bad_state_fraction`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitingReason {
    CrashLoopBackOff,
    ImagePullBackOff,
    ErrImagePull,
    CreateContainerError,
    Other,
}

impl WaitingReason {
    pub fn is_bad_state(&self) -> bool {
        !matches!(self, WaitingReason::Other)
    }
}

/// Pod phase as reported by the cluster driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// A single pod snapshot returned by `ClusterDriver::list_pods` (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSnapshot {
    pub name: String,
    pub phase: PodPhase,
    pub ready: bool,
    pub restart_count: u32,
    pub container_statuses: Vec<ContainerStatus>,
    pub created_at: DateTime<Utc>,
}

/// A generic handle to a cluster resource (Deployment/Job/StatefulSet-like)
/// returned by mutating `ClusterDriver` calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterResource {
    pub name: String,
    pub namespace: String,
    pub replicas: u32,
    pub image: String,
    pub revision: u64,
    pub labels: std::collections::HashMap<String, String>,
}

/// Declarative spec passed to `ClusterDriver::create`/`update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub replicas: u32,
    pub workload_id: ResourceId,
    pub labels: std::collections::HashMap<String, String>,
    pub env: std::collections::HashMap<String, String>,
}

/// A patch applied with strategic-merge semantics by `ClusterDriver::update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcePatch {
    pub image: Option<String>,
    pub replicas: Option<u32>,
    pub annotations: std::collections::HashMap<String, String>,
}

/// A watch-stream event (§4.1 `watch`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WatchEvent {
    Added(ClusterResource),
    Modified(ClusterResource),
    Deleted { name: String, namespace: String },
}
