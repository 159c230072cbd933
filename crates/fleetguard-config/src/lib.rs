//! Configuration parsing for the FleetGuard workload controller.
//!
//! A single KDL document describes the options in spec.md §6: worker caps,
//! default canary/rollback parameters, the policy evaluation mode, the
//! price table, and Health Evaluator weight overrides.

pub mod controller;
pub mod error;
mod kdl_util;

pub use controller::{ControllerConfig, HealthWeights, PriceTable};
pub use error::{ConfigError, ConfigResult};
