//! Progressive canary rollout driver (C5, spec §4.5).

pub mod controller;

pub use controller::{CanaryController, CanaryTarget};
