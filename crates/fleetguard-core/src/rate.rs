//! Rate-limiter scope keys and window state (spec §3 RateWindow, §4.4).
//!
//! The sliding-window algorithm itself lives in
//! `fleetguard_policy::rate_limiter`; this crate owns only the addressable
//! shapes (`RateScopeKey`, `RateWindow`) the Policy Engine and any external
//! inspector need to share.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::policy::RateScope;

/// `{resource-kind, resource-name, policy-id}` per §3 RateWindow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateScopeKey {
    pub scope: RateScope,
    pub resource_kind: String,
    pub resource_name: String,
    pub policy_id: ResourceId,
}

/// `{scope-key, window-start, count, limit, interval-seconds}` per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateWindow {
    pub window_start: DateTime<Utc>,
    pub count: u32,
    pub limit: u32,
    pub interval_seconds: u64,
}

impl RateWindow {
    pub fn new(limit: u32, interval_seconds: u64, now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            count: 0,
            limit,
            interval_seconds,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_start + chrono::Duration::seconds(self.interval_seconds as i64)
    }
}
