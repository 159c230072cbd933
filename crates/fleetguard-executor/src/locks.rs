//! Per-target serialization: two plans touching the same `(workload_id,
//! cluster_id)` pair must not dispatch decisions concurrently (spec §5:
//! "decisions against the same target are serialized").

use std::collections::HashMap;
use std::sync::Arc;

use fleetguard_core::ResourceId;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub type TargetKey = (ResourceId, ResourceId);

/// A registry of per-target mutexes, created lazily as targets are seen.
#[derive(Default)]
pub struct TargetLocks {
    mutexes: parking_lot::Mutex<HashMap<TargetKey, Arc<Mutex<()>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every target in `keys`, in a fixed order, so two plans with
    /// overlapping but non-identical target sets can never deadlock on each
    /// other. Holding the returned guards for the lifetime of dispatch is
    /// what makes per-target execution serial.
    pub async fn acquire(&self, mut keys: Vec<TargetKey>) -> Vec<OwnedMutexGuard<()>> {
        keys.sort_unstable();
        keys.dedup();

        let mutexes: Vec<Arc<Mutex<()>>> = {
            let mut table = self.mutexes.lock();
            keys.iter()
                .map(|key| table.entry(*key).or_insert_with(|| Arc::new(Mutex::new(()))).clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        guards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedups_repeated_targets_to_avoid_self_deadlock() {
        let locks = TargetLocks::new();
        let key = (ResourceId::new(), ResourceId::new());
        let guards = locks.acquire(vec![key, key, key]).await;
        assert_eq!(guards.len(), 1);
    }

    #[tokio::test]
    async fn disjoint_targets_acquire_independently() {
        let locks = Arc::new(TargetLocks::new());
        let a = (ResourceId::new(), ResourceId::new());
        let b = (ResourceId::new(), ResourceId::new());

        let _guard_a = locks.acquire(vec![a]).await;
        let locks2 = locks.clone();
        let handle = tokio::spawn(async move {
            let _guard_b = locks2.acquire(vec![b]).await;
        });
        tokio::time::timeout(std::time::Duration::from_millis(200), handle)
            .await
            .expect("disjoint target acquisition should not block")
            .unwrap();
    }
}
