pub mod api;
pub mod canary;
pub mod cancel;
pub mod decision;
pub mod deployment;
pub mod driver;
pub mod error;
pub mod events;
pub mod id;
pub mod plan;
pub mod policy;
pub mod rate;
pub mod rollback;
pub mod workload;

pub use error::{Error, Result};
pub use id::ResourceId;
