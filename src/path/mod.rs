//! Multi-hop path construction and maintenance.
//!
//! A path is an ordered triple of storage nodes (guard, middle, exit). The
//! pool keeps a small fixed number of live paths for redundancy, replaces
//! dead paths rather than repairing them, and keeps guard nodes distinct
//! across live paths whenever the node pool is large enough.
//!
//! Path building knows nothing about request content; it only produces a
//! reusable ordered hop list.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{NetworkError, Result};
use crate::types::StorageNode;

/// Number of hops in a path
pub const PATH_HOPS: usize = 3;

/// Number of live paths the pool maintains
pub const TARGET_PATH_COUNT: usize = 2;

/// How many candidate guards to try per missing path before giving up
const BUILD_ATTEMPTS_PER_SLOT: usize = 3;

/// Lifecycle of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    /// Hops selected, guard not yet probed
    Building,

    /// Guard probe succeeded; usable for sends
    Live,

    /// A hop failed; the path is discarded and never reused
    Dead,
}

/// An ordered sequence of three storage nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionPath {
    hops: [StorageNode; PATH_HOPS],
    state: PathState,
}

impl OnionPath {
    /// Create a path in the `Building` state
    pub fn new(hops: [StorageNode; PATH_HOPS]) -> Self {
        Self {
            hops,
            state: PathState::Building,
        }
    }

    /// Create a path in a specific state (tests and pool internals)
    pub fn with_state(hops: [StorageNode; PATH_HOPS], state: PathState) -> Self {
        Self { hops, state }
    }

    /// The ordered hops [guard, middle, exit]
    pub fn hops(&self) -> &[StorageNode; PATH_HOPS] {
        &self.hops
    }

    /// The guard hop, the only node the client contacts directly
    pub fn guard(&self) -> &StorageNode {
        &self.hops[0]
    }

    /// Current lifecycle state
    pub fn state(&self) -> PathState {
        self.state
    }

    /// Whether all three hops are pairwise distinct
    pub fn hops_distinct(&self) -> bool {
        self.hops[0] != self.hops[1] && self.hops[0] != self.hops[2] && self.hops[1] != self.hops[2]
    }

    /// Whether this path contains the given node at any hop
    pub fn contains(&self, node: &StorageNode) -> bool {
        self.hops.iter().any(|hop| hop == node)
    }
}

/// Connectivity probe run against a prospective guard before a path goes live
#[async_trait]
pub trait GuardProbe: Send + Sync {
    /// Verify the node is reachable and responsive
    async fn probe(&self, node: &StorageNode) -> Result<()>;
}

/// Pool of live paths, rebuilt to a target count as paths die
pub struct PathPool {
    paths: RwLock<Vec<OnionPath>>,
    /// Serializes rebuild-to-target so concurrent callers cannot
    /// over-provision; waiters piggyback on the running rebuild.
    rebuild_lock: Mutex<()>,
    target: usize,
}

impl Default for PathPool {
    fn default() -> Self {
        Self::new(TARGET_PATH_COUNT)
    }
}

impl PathPool {
    /// Create a pool maintaining `target` live paths
    pub fn new(target: usize) -> Self {
        Self {
            paths: RwLock::new(Vec::new()),
            rebuild_lock: Mutex::new(()),
            target,
        }
    }

    /// Snapshot of the current live paths
    pub fn live_paths(&self) -> Vec<OnionPath> {
        self.paths
            .read()
            .iter()
            .filter(|path| path.state() == PathState::Live)
            .cloned()
            .collect()
    }

    /// Number of live paths
    pub fn live_count(&self) -> usize {
        self.live_paths().len()
    }

    /// Pick a random live path for a send
    pub fn select_path(&self) -> Option<OnionPath> {
        let live = self.live_paths();
        live.choose(&mut rand::thread_rng()).cloned()
    }

    /// Mark `path` dead and drop it from selection.
    ///
    /// Dead paths are never retried; the next `ensure_paths` call restores
    /// the target count with fresh hops.
    pub fn mark_dead(&self, path: &OnionPath) {
        let mut paths = self.paths.write();
        if let Some(entry) = paths.iter_mut().find(|entry| entry.hops == path.hops) {
            if entry.state == PathState::Dead {
                return;
            }
            entry.state = PathState::Dead;
            warn!(guard = %entry.guard().ip, "onion path marked dead");
        }
        paths.retain(|entry| entry.state != PathState::Dead);
    }

    /// Guards currently used by live paths
    fn live_guards(&self) -> HashSet<StorageNode> {
        self.paths
            .read()
            .iter()
            .filter(|path| path.state() == PathState::Live)
            .map(|path| path.guard().clone())
            .collect()
    }

    /// Build paths until the target count is reached.
    ///
    /// Candidate hops are sampled from `pool_nodes`, excluding guards of
    /// live paths when the pool is large enough to allow it. Each
    /// prospective guard is probed before the path goes live; a probe
    /// failure leaves the candidate in `Building` and tries another sample.
    /// Rebuilds are serialized: a caller arriving while one is running
    /// awaits it and then re-checks instead of building duplicates.
    pub async fn ensure_paths(
        &self,
        pool_nodes: &HashSet<StorageNode>,
        probe: &dyn GuardProbe,
    ) -> Result<()> {
        let _guard = self.rebuild_lock.lock().await;

        while self.live_count() < self.target {
            let used_guards = self.live_guards();

            // Guard diversity is best-effort: only exclude used guards when
            // enough nodes remain to build a full path without them.
            let exclude_guards = pool_nodes.len() >= PATH_HOPS + used_guards.len();
            let mut candidates: Vec<&StorageNode> = pool_nodes
                .iter()
                .filter(|node| !exclude_guards || !used_guards.contains(*node))
                .collect();

            if candidates.len() < PATH_HOPS {
                return Err(NetworkError::InsufficientNodes);
            }

            let mut built = false;
            for _ in 0..BUILD_ATTEMPTS_PER_SLOT {
                candidates.shuffle(&mut rand::thread_rng());
                let hops: [StorageNode; PATH_HOPS] = [
                    candidates[0].clone(),
                    candidates[1].clone(),
                    candidates[2].clone(),
                ];
                let candidate = OnionPath::new(hops);
                debug_assert!(candidate.hops_distinct());

                match probe.probe(candidate.guard()).await {
                    Ok(()) => {
                        debug!(guard = %candidate.guard().ip, "onion path went live");
                        let live = OnionPath::with_state(candidate.hops, PathState::Live);
                        self.paths.write().push(live);
                        built = true;
                        break;
                    }
                    Err(err) => {
                        debug!(
                            guard = %candidate.guard().ip,
                            error = %err,
                            "guard probe failed, resampling"
                        );
                    }
                }
            }

            if !built {
                return Err(NetworkError::InsufficientNodes);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn node(index: u8) -> StorageNode {
        StorageNode {
            ed25519_pubkey: hex::encode([index; 32]),
            x25519_pubkey: hex::encode([index.wrapping_add(1); 32]),
            ip: format!("10.0.0.{}", index),
            port: 22020,
            version: None,
        }
    }

    fn pool_of(count: u8) -> HashSet<StorageNode> {
        (0..count).map(node).collect()
    }

    struct AlwaysUp;

    #[async_trait]
    impl GuardProbe for AlwaysUp {
        async fn probe(&self, _node: &StorageNode) -> Result<()> {
            Ok(())
        }
    }

    struct AlwaysDown;

    #[async_trait]
    impl GuardProbe for AlwaysDown {
        async fn probe(&self, _node: &StorageNode) -> Result<()> {
            Err(NetworkError::PathFailure("unreachable".into()))
        }
    }

    #[test]
    fn hops_are_pairwise_distinct() {
        let path = OnionPath::new([node(1), node(2), node(3)]);
        assert!(path.hops_distinct());

        let degenerate = OnionPath::new([node(1), node(1), node(3)]);
        assert!(!degenerate.hops_distinct());
    }

    #[tokio::test]
    async fn ensure_paths_reaches_target_with_distinct_guards() {
        let pool = PathPool::new(2);
        pool.ensure_paths(&pool_of(10), &AlwaysUp).await.unwrap();

        let live = pool.live_paths();
        assert_eq!(live.len(), 2);
        for path in &live {
            assert!(path.hops_distinct());
        }
        assert_ne!(live[0].guard(), live[1].guard());
    }

    #[tokio::test]
    async fn guard_diversity_relaxes_on_small_pool() {
        // 3 nodes cannot provide 2 disjoint guards; the pool still builds.
        let pool = PathPool::new(2);
        pool.ensure_paths(&pool_of(3), &AlwaysUp).await.unwrap();
        assert_eq!(pool.live_count(), 2);
    }

    #[tokio::test]
    async fn insufficient_pool_is_an_error() {
        let pool = PathPool::new(1);
        let result = pool.ensure_paths(&pool_of(2), &AlwaysUp).await;
        assert!(matches!(result, Err(NetworkError::InsufficientNodes)));
    }

    #[tokio::test]
    async fn probe_failure_never_goes_live() {
        let pool = PathPool::new(1);
        let result = pool.ensure_paths(&pool_of(6), &AlwaysDown).await;
        assert!(matches!(result, Err(NetworkError::InsufficientNodes)));
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test]
    async fn dead_path_is_excluded_from_selection() {
        let pool = PathPool::new(2);
        pool.ensure_paths(&pool_of(10), &AlwaysUp).await.unwrap();

        let victim = pool.select_path().unwrap();
        pool.mark_dead(&victim);

        assert_eq!(pool.live_count(), 1);
        let survivor = pool.select_path().unwrap();
        assert_ne!(survivor.hops(), victim.hops());
    }

    #[tokio::test]
    async fn rebuild_restores_target_after_death() {
        let pool = PathPool::new(2);
        let nodes = pool_of(12);
        pool.ensure_paths(&nodes, &AlwaysUp).await.unwrap();

        let victim = pool.select_path().unwrap();
        pool.mark_dead(&victim);
        pool.ensure_paths(&nodes, &AlwaysUp).await.unwrap();

        assert_eq!(pool.live_count(), 2);
        // The dead path's exact hop list is never reused.
        for path in pool.live_paths() {
            assert_ne!(path.hops(), victim.hops());
        }
    }

    #[tokio::test]
    async fn concurrent_rebuilds_do_not_over_provision() {
        struct CountingProbe(AtomicUsize);

        #[async_trait]
        impl GuardProbe for CountingProbe {
            async fn probe(&self, _node: &StorageNode) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(())
            }
        }

        let pool = std::sync::Arc::new(PathPool::new(2));
        let probe = std::sync::Arc::new(CountingProbe(AtomicUsize::new(0)));
        let nodes = pool_of(10);

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let probe = probe.clone();
                let nodes = nodes.clone();
                tokio::spawn(async move { pool.ensure_paths(&nodes, probe.as_ref()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(pool.live_count(), 2);
        assert_eq!(probe.0.load(Ordering::SeqCst), 2);
    }
}
