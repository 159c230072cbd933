//! Plan Executor (C7, spec §4.7): the in-memory fleet registry plus the
//! `ControllerApi` implementation that ties the Policy Engine, Canary
//! Controller, and Rollback Controller together.

pub mod executor;
pub mod locks;
pub mod state;

pub use executor::PlanExecutorApi;
pub use locks::TargetLocks;
pub use state::{ControllerState, StateLookup};
