//! Health-triggered rollback monitoring (C6, spec §4.6).

pub mod controller;
pub mod lookup;

pub use controller::RollbackController;
pub use lookup::{DeploymentLookup, DeploymentRef};
