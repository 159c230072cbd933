//! `ClusterDriver` implementations (§4.1): a real one backed by Kubernetes,
//! and a deterministic in-memory one for tests and the CLI demo mode.

pub mod kubernetes;
pub mod retry;
pub mod simulated;

pub use kubernetes::KubernetesDriver;
pub use retry::BackoffPolicy;
pub use simulated::SimulatedDriver;
