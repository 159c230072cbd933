//! Workload and Cluster entities (spec.md §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ResourceId;

/// Kind of workload, determining scheduling and lifecycle expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    Training,
    Inference,
    Batch,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Training => write!(f, "training"),
            WorkloadKind::Inference => write!(f, "inference"),
            WorkloadKind::Batch => write!(f, "batch"),
        }
    }
}

/// GPU resource request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpuRequest {
    pub count: u32,
    pub sku: GpuSku,
}

/// GPU SKU, keyed into the price table (§4.3 cost_ceiling).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GpuSku {
    L4,
    A100,
    H100,
    T4,
}

impl std::fmt::Display for GpuSku {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuSku::L4 => write!(f, "L4"),
            GpuSku::A100 => write!(f, "A100"),
            GpuSku::H100 => write!(f, "H100"),
            GpuSku::T4 => write!(f, "T4"),
        }
    }
}

/// A resource request: cpu (cores), memory (bytes), optional gpu.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu_cores: f64,
    pub memory_bytes: u64,
    pub gpu: Option<GpuRequest>,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            cpu_cores: 0.0,
            memory_bytes: 0,
            gpu: None,
        }
    }
}

/// A logical unit of compute, immutable after creation except via explicit
/// update (§3 Workload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub id: ResourceId,
    pub name: String,
    pub kind: WorkloadKind,
    pub image: String,
    pub resources: ResourceRequest,
    pub env: HashMap<String, String>,
    pub config_ref: Option<String>,
}

/// A handle to one target cluster (§3 Cluster).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ResourceId,
    pub name: String,
    /// Opaque connection descriptor (kubeconfig path, context name, …).
    pub connection: String,
    pub labels: HashMap<String, String>,
    pub gpu_families: Vec<GpuSku>,
}
