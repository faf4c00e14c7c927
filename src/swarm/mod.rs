//! Swarm resolution: mapping an account or group identifier to the subset
//! of storage nodes responsible for it.
//!
//! Responsibility assignment is decided server-side; the client just asks
//! any known node and caches the answer per identifier inside a freshness
//! window. Callers pick a random member of the swarm as their destination
//! so no single node is depended on.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::seq::IteratorRandom;
use serde::Deserialize;
use tracing::debug;

use crate::error::{NetworkError, Result};
use crate::types::StorageNode;

/// Cached swarm mappings are trusted for this long
pub const SWARM_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Source answering "which nodes hold this identifier"
#[async_trait]
pub trait SwarmSource: Send + Sync {
    /// Ask `from` for the swarm of `identifier`
    async fn fetch_swarm(
        &self,
        from: &StorageNode,
        identifier: &str,
    ) -> Result<HashSet<StorageNode>>;
}

struct CachedSwarm {
    nodes: HashSet<StorageNode>,
    fetched_at: Instant,
}

/// Resolves and caches per-identifier swarms
pub struct SwarmResolver {
    cache: DashMap<String, CachedSwarm>,
    source: Arc<dyn SwarmSource>,
    ttl: Duration,
}

impl SwarmResolver {
    /// Create a resolver over a swarm source
    pub fn new(source: Arc<dyn SwarmSource>) -> Self {
        Self {
            cache: DashMap::new(),
            source,
            ttl: SWARM_CACHE_TTL,
        }
    }

    /// Override the cache freshness window (tests)
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The swarm responsible for `identifier`.
    ///
    /// `pool` is a snapshot of the current node pool; resolution asks a
    /// random member. Fails with `InsufficientNodes` when the pool is empty.
    pub async fn swarm_for(
        &self,
        identifier: &str,
        pool: &HashSet<StorageNode>,
    ) -> Result<HashSet<StorageNode>> {
        if let Some(entry) = self.cache.get(identifier) {
            if entry.fetched_at.elapsed() < self.ttl && !entry.nodes.is_empty() {
                return Ok(entry.nodes.clone());
            }
        }

        let from = pool
            .iter()
            .choose(&mut rand::thread_rng())
            .ok_or(NetworkError::InsufficientNodes)?;

        let nodes = self.source.fetch_swarm(from, identifier).await?;
        if nodes.is_empty() {
            return Err(NetworkError::InsufficientNodes);
        }
        debug!(identifier, count = nodes.len(), "swarm resolved");
        self.cache.insert(
            identifier.to_string(),
            CachedSwarm {
                nodes: nodes.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(nodes)
    }

    /// A random member of the identifier's swarm
    pub async fn random_swarm_member(
        &self,
        identifier: &str,
        pool: &HashSet<StorageNode>,
    ) -> Result<StorageNode> {
        let swarm = self.swarm_for(identifier, pool).await?;
        swarm
            .into_iter()
            .choose(&mut rand::thread_rng())
            .ok_or(NetworkError::InsufficientNodes)
    }

    /// Drop the cached swarm for `identifier`, e.g. after a node reports
    /// it no longer belongs to it
    pub fn invalidate(&self, identifier: &str) {
        self.cache.remove(identifier);
    }
}

/// Wire shape of a `get_snodes_for_pubkey` entry
#[derive(Debug, Deserialize)]
struct SwarmNodeEntry {
    pubkey_ed25519: String,
    pubkey_x25519: String,
    ip: String,
    #[serde(alias = "port_https")]
    port: u16,
}

#[derive(Debug, Deserialize)]
struct SwarmResponse {
    snodes: Vec<SwarmNodeEntry>,
}

/// Resolves swarms over direct HTTPS
pub struct HttpSwarmSource {
    client: reqwest::Client,
}

impl HttpSwarmSource {
    /// Build a source over the shared snode HTTP client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SwarmSource for HttpSwarmSource {
    async fn fetch_swarm(
        &self,
        from: &StorageNode,
        identifier: &str,
    ) -> Result<HashSet<StorageNode>> {
        let body = serde_json::json!({
            "method": "get_snodes_for_pubkey",
            "params": { "pubkey": identifier },
        });

        let response = self.client.post(from.rpc_url()).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(NetworkError::HttpRequestFailed {
                code: response.status().as_u16(),
                body: response.text().await.ok(),
            });
        }

        let parsed: SwarmResponse = response
            .json()
            .await
            .map_err(|e| NetworkError::ParsingFailed(format!("malformed swarm response: {}", e)))?;

        Ok(parsed
            .snodes
            .into_iter()
            .filter(|entry| !entry.ip.is_empty() && entry.ip != "0.0.0.0")
            .map(|entry| StorageNode {
                ed25519_pubkey: entry.pubkey_ed25519,
                x25519_pubkey: entry.pubkey_x25519,
                ip: entry.ip,
                port: entry.port,
                version: None,
            })
            .collect())
    }
}
