//! Exponential backoff for transient cluster-driver faults (spec §4.1:
//! "retries transient faults with exponential backoff (base 1s, factor 2,
//! max 5 attempts, max delay 30s)").

use std::future::Future;
use std::time::Duration;

use fleetguard_core::{Error, Result};
use fleetguard_core::error::DriverFault;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_attempts: u32,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            max_attempts: 5,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the `attempt`'th retry (0-indexed: the delay before the
    /// first retry is `delay_for(0)` == `base`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.saturating_pow(attempt);
        self.base.saturating_mul(multiplier).min(self.max_delay)
    }
}

/// Retry `op` while it fails with a transient `DriverFault`
/// (`ClusterUnavailable`/`ClusterTimeout`); any other fault is returned
/// immediately (§4.1 failure model: "other faults are returned"). Attempts
/// are capped at `policy.max_attempts`; the final attempt's error is
/// returned on exhaustion.
pub async fn retry_transient<F, Fut, T>(policy: &BackoffPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let transient = matches!(&err, Error::Driver { fault, .. } if fault.is_transient());
                attempt += 1;
                if !transient || attempt >= policy.max_attempts {
                    return Err(err);
                }
                tracing::warn!(attempt, error = %err, "transient driver fault, retrying");
                tokio::time::sleep(policy.delay_for(attempt - 1)).await;
            }
        }
    }
}

pub fn is_transient(fault: DriverFault) -> bool {
    fault.is_transient()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_geometrically_then_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retries_transient_and_gives_up_on_permanent() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            factor: 2,
            max_attempts: 5,
            max_delay: Duration::from_millis(4),
        };
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::driver(DriverFault::Invalid, "nope")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "permanent faults must not retry");
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts_on_transient() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            factor: 2,
            max_attempts: 3,
            max_delay: Duration::from_millis(4),
        };
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::driver(DriverFault::ClusterUnavailable, "down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn succeeds_after_transient_retries() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            factor: 2,
            max_attempts: 5,
            max_delay: Duration::from_millis(4),
        };
        let calls = AtomicU32::new(0);
        let result = retry_transient(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::driver(DriverFault::ClusterTimeout, "slow"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }
}
