//! `DeploymentLookup`: the injected collaborator the Rollback Controller
//! consults to resolve a registered deployment id to its cluster resource
//! and current lifecycle status (persistence is an external collaborator
//! per spec §1; this is the seam a real implementation sits behind).

use async_trait::async_trait;

use fleetguard_core::ResourceId;
use fleetguard_core::deployment::DeploymentStatus;

/// The cluster-facing identity of a deployment: what the driver needs to
/// find it, and the declared replica count the Health Evaluator needs.
#[derive(Debug, Clone)]
pub struct DeploymentRef {
    pub name: String,
    pub namespace: String,
    pub declared_replicas: u32,
}

#[async_trait]
pub trait DeploymentLookup: Send + Sync {
    async fn resource_ref(&self, deployment_id: ResourceId) -> Option<DeploymentRef>;

    /// `None` is treated the same as a non-terminal status — the monitor
    /// keeps checking rather than guessing at an unregister.
    async fn status(&self, deployment_id: ResourceId) -> Option<DeploymentStatus>;
}
