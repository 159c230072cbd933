//! `FleetLookup`: the injected collaborator the Policy Engine consults for
//! data it does not own itself — current resource requests, fleet-wide
//! aggregates, and uptime/latency/success-rate telemetry (spec §4.3 `quota`,
//! `sla`, `slo`). Persistence and the telemetry scrape store are external
//! collaborators per spec §1; this trait is the seam a real implementation
//! of either sits behind.
//!
//! Every method returns `Option`/an aggregate that defaults to zero rather
//! than a typed error: a lookup that cannot produce a value (timeout, data
//! not yet scraped) is indistinguishable from "no data" at this boundary,
//! and the engine treats both as the `evaluation_timeout` case in §4.3's
//! failure semantics.

use async_trait::async_trait;

use fleetguard_core::ResourceId;
use fleetguard_core::workload::ResourceRequest;

/// Scope a quota aggregate is computed over (§4.3 `quota` constraint).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateScope {
    Namespace,
    Cluster,
}

/// Aggregate resource usage across every deployment in scope, **excluding**
/// the decision's own target workload — the engine adds the target's
/// post-decision contribution on top of this (§4.3 quota: "post-state
/// aggregate over the scope exceeds the bound").
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregateUsage {
    pub replicas: u32,
    pub cpu_cores: f64,
    pub memory_bytes: u64,
    pub gpu_count: u32,
}

#[async_trait]
pub trait FleetLookup: Send + Sync {
    /// The workload's declared per-replica resource request, used to price
    /// `scale`/`reschedule`/`rollback`/`drain`/`restart` decisions that don't
    /// themselves carry a resource payload (§4.3 `cost_ceiling`).
    async fn workload_resources(&self, workload_id: ResourceId) -> Option<ResourceRequest>;

    /// The workload's current replica count on `cluster_id`, used as the
    /// baseline for decisions that don't change replica count.
    async fn current_replicas(&self, workload_id: ResourceId, cluster_id: ResourceId) -> Option<u32>;

    /// Usage from every *other* deployment in `namespace`/`cluster_id`
    /// (§4.3 `quota`).
    async fn aggregate_usage(
        &self,
        cluster_id: ResourceId,
        namespace: &str,
        scope: AggregateScope,
    ) -> Option<AggregateUsage>;

    /// Fraction of the last 7 days the target was up (§4.3 `sla`).
    async fn uptime_7d(&self, workload_id: ResourceId) -> Option<f64>;

    /// Current measured p95 latency in milliseconds (§4.3 `slo`).
    async fn current_latency_p95_ms(&self, workload_id: ResourceId) -> Option<f64>;

    /// Current measured success rate in `[0, 1]` (§4.3 `slo`).
    async fn current_success_rate(&self, workload_id: ResourceId) -> Option<f64>;
}

/// A `FleetLookup` that never has data — every rule needing it degrades to
/// `evaluation_timeout`/`warn`, matching "empty policy set ⇒ every plan
/// approved" style conservatism when no telemetry/persistence backend is
/// wired up (e.g. the CLI demo mode).
pub struct NullFleetLookup;

#[async_trait]
impl FleetLookup for NullFleetLookup {
    async fn workload_resources(&self, _workload_id: ResourceId) -> Option<ResourceRequest> {
        None
    }

    async fn current_replicas(&self, _workload_id: ResourceId, _cluster_id: ResourceId) -> Option<u32> {
        None
    }

    async fn aggregate_usage(
        &self,
        _cluster_id: ResourceId,
        _namespace: &str,
        _scope: AggregateScope,
    ) -> Option<AggregateUsage> {
        None
    }

    async fn uptime_7d(&self, _workload_id: ResourceId) -> Option<f64> {
        None
    }

    async fn current_latency_p95_ms(&self, _workload_id: ResourceId) -> Option<f64> {
        None
    }

    async fn current_success_rate(&self, _workload_id: ResourceId) -> Option<f64> {
        None
    }
}
