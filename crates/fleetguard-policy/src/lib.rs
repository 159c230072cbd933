//! Policy Engine (C3, spec §4.3) and Rate Limiter (C4, spec §4.4).
//!
//! The engine itself is stateless and re-entrant (§5); the only mutable
//! shared state it touches is the `RateLimiter`'s per-key window map, which
//! is safe to hand out as a single `Arc` shared across every plan-executor
//! worker.

pub mod engine;
pub mod lookup;
pub mod rate_limiter;

pub use engine::{EvaluationContext, PolicyEngine, PolicyEvaluation};
pub use lookup::{AggregateScope, AggregateUsage, FleetLookup};
pub use rate_limiter::RateLimiter;
