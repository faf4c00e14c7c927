//! Node directory: the cached pool of candidate storage nodes.
//!
//! The pool starts empty, is populated by a bootstrap request against a
//! fixed seed list, and is periodically refreshed by asking a random
//! already-known node for the full service node list. Replacement is
//! all-or-nothing so concurrent path builders never observe a torn pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, Result};
use crate::types::{NodePool, StorageNode};

/// Pool entries younger than this are served from cache
pub const POOL_STALE_AFTER: Duration = Duration::from_secs(2 * 60 * 60);

/// Below this size the pool is considered exhausted by churn
pub const MIN_POOL_SIZE: usize = 12;

/// Source of the authoritative service node list
///
/// Implemented over direct HTTPS for production; tests substitute fakes.
#[async_trait]
pub trait NodeListSource: Send + Sync {
    /// Fetch the full node list from `from`
    async fn fetch_nodes(&self, from: &StorageNode) -> Result<HashSet<StorageNode>>;
}

/// Maintains the cached pool and its bootstrap/refresh lifecycle
pub struct NodeDirectory {
    pool: RwLock<NodePool>,
    /// Coalesces refreshes: one in flight, concurrent callers await it and
    /// re-check the pool instead of issuing a duplicate request.
    refresh_lock: Mutex<()>,
    seeds: Vec<StorageNode>,
    source: Arc<dyn NodeListSource>,
    stale_after: Duration,
}

impl NodeDirectory {
    /// Create a directory bootstrapping from `seeds`
    pub fn new(seeds: Vec<StorageNode>, source: Arc<dyn NodeListSource>) -> Self {
        Self {
            pool: RwLock::new(NodePool::empty()),
            refresh_lock: Mutex::new(()),
            seeds,
            source,
            stale_after: POOL_STALE_AFTER,
        }
    }

    /// Override the staleness window (tests)
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Snapshot of the current pool contents
    pub fn snapshot(&self) -> HashSet<StorageNode> {
        self.pool.read().nodes.clone()
    }

    fn pool_usable(&self) -> Option<HashSet<StorageNode>> {
        let pool = self.pool.read();
        let fresh = pool
            .refreshed_at
            .map(|at| at.elapsed() < self.stale_after)
            .unwrap_or(false);
        if pool.ever_populated && fresh && pool.nodes.len() >= MIN_POOL_SIZE {
            Some(pool.nodes.clone())
        } else {
            None
        }
    }

    /// Return the node pool, refreshing it first if stale or exhausted.
    ///
    /// Fails with `InsufficientNodes` when both the cache and a bootstrap
    /// refresh across every seed come up empty.
    pub async fn ensure_pool(&self) -> Result<HashSet<StorageNode>> {
        if let Some(nodes) = self.pool_usable() {
            return Ok(nodes);
        }

        let _guard = self.refresh_lock.lock().await;
        // A refresh may have completed while we waited for the lock.
        if let Some(nodes) = self.pool_usable() {
            return Ok(nodes);
        }
        self.refresh().await
    }

    /// Drop the cached pool and rebuild it from scratch
    pub async fn invalidate_and_refresh(&self) -> Result<HashSet<StorageNode>> {
        let _guard = self.refresh_lock.lock().await;
        {
            let mut pool = self.pool.write();
            pool.nodes.clear();
        }
        self.refresh().await
    }

    /// Fetch a fresh node list and replace the pool wholesale.
    ///
    /// Prefers a random currently-cached node; falls back to the seed list
    /// in order. Caller must hold `refresh_lock`.
    async fn refresh(&self) -> Result<HashSet<StorageNode>> {
        let cached = {
            let pool = self.pool.read();
            pool.nodes.iter().choose(&mut rand::thread_rng()).cloned()
        };

        let mut sources: Vec<StorageNode> = Vec::with_capacity(1 + self.seeds.len());
        if let Some(node) = cached {
            sources.push(node);
        }
        sources.extend(self.seeds.iter().cloned());

        for node in &sources {
            match self.source.fetch_nodes(node).await {
                Ok(nodes) if nodes.len() >= MIN_POOL_SIZE => {
                    info!(count = nodes.len(), source = %node.ip, "node pool refreshed");
                    self.pool.write().replace(nodes.clone());
                    return Ok(nodes);
                }
                Ok(nodes) => {
                    warn!(
                        count = nodes.len(),
                        source = %node.ip,
                        "node list too small, trying next source"
                    );
                }
                Err(err) => {
                    debug!(source = %node.ip, error = %err, "node list fetch failed");
                }
            }
        }

        warn!("every node list source failed, pool unavailable");
        Err(NetworkError::InsufficientNodes)
    }
}

/// Wire shape of a `get_service_nodes` entry
#[derive(Debug, Deserialize)]
struct ServiceNodeState {
    pubkey_ed25519: String,
    pubkey_x25519: String,
    public_ip: String,
    storage_port: u16,
    #[serde(default)]
    storage_server_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceNodeListResult {
    service_node_states: Vec<ServiceNodeState>,
}

#[derive(Debug, Deserialize)]
struct ServiceNodeListResponse {
    result: ServiceNodeListResult,
}

/// Fetches node lists over direct HTTPS
pub struct HttpNodeListSource {
    client: reqwest::Client,
}

impl HttpNodeListSource {
    /// Build a source over the shared snode HTTP client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeListSource for HttpNodeListSource {
    async fn fetch_nodes(&self, from: &StorageNode) -> Result<HashSet<StorageNode>> {
        let body = serde_json::json!({
            "method": "get_service_nodes",
            "params": {
                "active_only": true,
                "fields": {
                    "public_ip": true,
                    "storage_port": true,
                    "pubkey_ed25519": true,
                    "pubkey_x25519": true,
                    "storage_server_version": true,
                },
            },
        });

        let response = self
            .client
            .post(from.rpc_url())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NetworkError::HttpRequestFailed {
                code: response.status().as_u16(),
                body: response.text().await.ok(),
            });
        }

        let parsed: ServiceNodeListResponse = response.json().await.map_err(|e| {
            NetworkError::ParsingFailed(format!("malformed service node list: {}", e))
        })?;

        let nodes = parsed
            .result
            .service_node_states
            .into_iter()
            // Nodes without a routable address cannot serve requests.
            .filter(|state| !state.public_ip.is_empty() && state.public_ip != "0.0.0.0")
            .map(|state| StorageNode {
                ed25519_pubkey: state.pubkey_ed25519,
                x25519_pubkey: state.pubkey_x25519,
                ip: state.public_ip,
                port: state.storage_port,
                version: state.storage_server_version,
            })
            .collect();
        Ok(nodes)
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
            ip: format!("10.1.0.{}", index),
            port: 22020,
            version: None,
        }
    }

    fn seeds() -> Vec<StorageNode> {
        vec![node(250), node(251)]
    }

    fn full_pool() -> HashSet<StorageNode> {
        (0..MIN_POOL_SIZE as u8 + 4).map(node).collect()
    }

    struct FakeSource {
        fetches: AtomicUsize,
        fail: bool,
    }

    impl FakeSource {
        fn working() -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl NodeListSource for FakeSource {
        async fn fetch_nodes(&self, _from: &StorageNode) -> Result<HashSet<StorageNode>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                Err(NetworkError::TimedOut)
            } else {
                Ok(full_pool())
            }
        }
    }

    #[tokio::test]
    async fn cold_start_bootstraps_from_seeds() {
        let source = FakeSource::working();
        let directory = NodeDirectory::new(seeds(), source.clone());

        let pool = directory.ensure_pool().await.unwrap();
        assert_eq!(pool, full_pool());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_pool_is_served_from_cache() {
        let source = FakeSource::working();
        let directory = NodeDirectory::new(seeds(), source.clone());

        directory.ensure_pool().await.unwrap();
        directory.ensure_pool().await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_sources_failing_surfaces_insufficient_nodes() {
        // Empty cache plus a seed list whose every entry fails.
        let source = FakeSource::broken();
        let directory = NodeDirectory::new(seeds(), source.clone());

        let result = directory.ensure_pool().await;
        assert!(matches!(result, Err(NetworkError::InsufficientNodes)));
        // Both seeds were tried before giving up.
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_coalesce_into_one_refresh() {
        let source = FakeSource::working();
        let directory = Arc::new(NodeDirectory::new(seeds(), source.clone()));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let directory = directory.clone();
                tokio::spawn(async move { directory.ensure_pool().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_rebuild() {
        let source = FakeSource::working();
        let directory = NodeDirectory::new(seeds(), source.clone());

        directory.ensure_pool().await.unwrap();
        directory.invalidate_and_refresh().await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }
}
