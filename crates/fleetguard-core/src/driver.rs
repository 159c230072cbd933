//! `ClusterDriver` trait — the typed interface to a single cluster (§4.1).
//!
//! One async trait per responsibility boundary, `Send + Sync` so it can
//! live behind an `Arc` and be shared across the worker pool described in
//! §5.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::Result;
use crate::deployment::{ClusterResource, PodSnapshot, ResourcePatch, ResourceSpec, WatchEvent};

/// Uniform interface over a target cluster (§4.1).
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    /// Name of this driver implementation (`"kubernetes"`, `"simulated"`, …).
    fn name(&self) -> &'static str;

    /// Idempotent on `(name, namespace)`. Injects the managed-by labels
    /// before create. Fails with `DriverFault::AlreadyExists` when the named
    /// resource exists and its managed-by label differs.
    async fn create(&self, spec: ResourceSpec) -> Result<ClusterResource>;

    /// Returns `Ok(None)` when the resource is absent (not a `NotFound` error —
    /// callers that need the distinction use `NotFound` from `get_required`).
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<ClusterResource>>;

    /// Like `get`, but surfaces absence as `Error::NotFound`.
    async fn get_required(&self, name: &str, namespace: &str) -> Result<ClusterResource> {
        self.get(name, namespace)
            .await?
            .ok_or_else(|| crate::Error::not_found(format!("{namespace}/{name}")))
    }

    /// Refuses negative or absurd (> 10,000) replica counts.
    async fn scale(&self, name: &str, namespace: &str, replicas: u32) -> Result<ClusterResource>;

    /// Strategic-merge semantics; never touches managed-by labels.
    async fn update(
        &self,
        name: &str,
        namespace: &str,
        patch: ResourcePatch,
    ) -> Result<ClusterResource>;

    /// When `to_revision` is `None`, reverts to the previous managed
    /// revision. Fails with a `NoPreviousRevision`-flavored `Invalid` fault
    /// if none exists.
    async fn rollback(
        &self,
        name: &str,
        namespace: &str,
        to_revision: Option<u64>,
    ) -> Result<ClusterResource>;

    async fn delete(&self, name: &str, namespace: &str, grace_seconds: u64) -> Result<()>;

    /// At least `{phase, ready, restart_count, container_statuses}` per pod.
    async fn list_pods(&self, name: &str, namespace: &str) -> Result<Vec<PodSnapshot>>;

    /// Produces `Added | Modified | Deleted` events; on stream termination
    /// the driver restarts transparently with backoff, preserving listener
    /// ordering (§4.1). Implementations that cannot watch natively may
    /// poll-and-diff, but must preserve this event contract.
    async fn watch(
        &self,
        resource_kind: &str,
        namespace: &str,
        label_selector: &str,
    ) -> Result<BoxStream<'static, WatchEvent>>;
}
