//! In-process coordination between concurrent triggers.
//!
//! [`SupersessionRegistry`] remembers the newest generation seen per source
//! ref so that a run started for an older push can tell it has been
//! overtaken. Generations themselves come from the ledger.
//! [`BranchLocks`] serialises ref mutations per branch. Cross-process safety
//! comes from the compare-and-swap ref update in [`crate::git`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// Latest trigger generation per source ref.
#[derive(Debug, Clone, Default)]
pub struct SupersessionRegistry {
    inner: Arc<Mutex<HashMap<String, u64>>>,
}

impl SupersessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `generation` was issued for `source_ref`. An older
    /// generation never replaces a newer one.
    pub fn observe(&self, source_ref: &str, generation: u64) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let latest = map.entry(source_ref.to_string()).or_insert(0);
        *latest = (*latest).max(generation);
    }

    /// Whether `generation` is still the newest trigger for `source_ref`.
    pub fn is_current(&self, source_ref: &str, generation: u64) -> bool {
        self.current(source_ref) == Some(generation)
    }

    pub fn current(&self, source_ref: &str) -> Option<u64> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(source_ref).copied()
    }
}

/// Guards held while mutating one or more branches. Released on drop.
pub struct BranchGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// One async mutex per branch name.
#[derive(Debug, Clone, Default)]
pub struct BranchLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl BranchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, branch: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(branch.to_string()).or_default().clone()
    }

    pub async fn lock(&self, branch: &str) -> BranchGuard {
        self.lock_many(&[branch]).await
    }

    /// Lock several branches. Names are deduplicated and acquired in sorted
    /// order so two callers locking the same set cannot deadlock.
    pub async fn lock_many(&self, branches: &[&str]) -> BranchGuard {
        let ordered: BTreeSet<&str> = branches.iter().copied().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for branch in ordered {
            guards.push(self.handle(branch).lock_owned().await);
        }
        BranchGuard { _guards: guards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn newest_observed_generation_wins() {
        let reg = SupersessionRegistry::new();
        reg.observe("dmz", 1);
        reg.observe("dmz", 3);
        reg.observe("dmz", 2);
        reg.observe("refs/pull/3/head", 1);
        assert!(reg.is_current("dmz", 3));
        assert!(!reg.is_current("dmz", 2));
        assert!(reg.is_current("refs/pull/3/head", 1));
        assert_eq!(reg.current("unknown"), None);
    }

    #[tokio::test]
    async fn lock_many_serialises_overlapping_sets() {
        let locks = BranchLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..4 {
            let locks = locks.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                // alternate order to exercise the sorting
                let set: [&str; 2] = if i % 2 == 0 { ["main", "dmz"] } else { ["dmz", "main"] };
                let _guard = locks.lock_many(&set).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_names_do_not_self_deadlock() {
        let locks = BranchLocks::new();
        let _guard = locks.lock_many(&["dmz", "dmz"]).await;
    }
}
