//! The injectable network service object.
//!
//! [`SnodeNetwork`] owns the node directory, the path pool, the transports,
//! and the resynced network clock. It is constructed once per process and
//! passed by handle to callers; there is no global state. The send pipeline
//! here is the only place retries happen; transports and resolvers fail
//! fast and let the classifier decide.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::auth::AuthenticationMethod;
use crate::config::NetworkConfig;
use crate::directory::{HttpNodeListSource, NodeDirectory};
use crate::error::{NetworkError, Result};
use crate::path::{GuardProbe, PathPool, TARGET_PATH_COUNT};
use crate::retry::{classify, ClockOffset, ErrorAction, RetryState, STATUS_WRONG_SWARM};
use crate::rpc::SnodeRpc;
use crate::swarm::{HttpSwarmSource, SwarmResolver};
use crate::transport::{
    DirectTransport, OnionTransport, OverlayTransport, Transport, TransportSelector,
};
use crate::types::{Destination, ResponseInfo, SendRequest, StorageNode};

/// Timeout for guard connectivity probes
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest request body accepted by the network
pub const MAX_REQUEST_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Probes a prospective guard with an unauthenticated `info` query
struct HttpGuardProbe {
    client: reqwest::Client,
}

#[async_trait]
impl GuardProbe for HttpGuardProbe {
    async fn probe(&self, node: &StorageNode) -> Result<()> {
        let body = serde_json::json!({ "method": "info", "params": {} });
        let response = self
            .client
            .post(node.rpc_url())
            .timeout(PROBE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| NetworkError::PathFailure(format!("guard probe failed: {}", e)))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(NetworkError::PathFailure(format!(
                "guard probe status {}",
                response.status()
            )))
        }
    }
}

/// The multi-transport request/path layer
pub struct SnodeNetwork {
    config: NetworkConfig,
    directory: Arc<NodeDirectory>,
    paths: Arc<PathPool>,
    swarm: SwarmResolver,
    selector: TransportSelector,
    clock: Arc<ClockOffset>,
    overlay: Option<Arc<OverlayTransport>>,
}

impl SnodeNetwork {
    /// Construct the full production stack from configuration.
    ///
    /// Storage nodes present self-signed certificates tied to their keys,
    /// so certificate-authority validation is disabled on the node client.
    pub fn new(config: NetworkConfig) -> Result<Self> {
        let config = config.validated()?;

        let node_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NetworkError::InvalidUrl(format!("http client: {}", e)))?;

        let directory = Arc::new(NodeDirectory::new(
            config.seeds.clone(),
            Arc::new(HttpNodeListSource::new(node_client.clone())),
        ));
        let paths = Arc::new(PathPool::new(TARGET_PATH_COUNT));
        let probe: Arc<dyn GuardProbe> = Arc::new(HttpGuardProbe {
            client: node_client.clone(),
        });

        let onion = Arc::new(OnionTransport::new(
            directory.clone(),
            paths.clone(),
            probe,
            node_client.clone(),
        ));
        let overlay = Arc::new(OverlayTransport::new(
            node_client.clone(),
            crate::transport::overlay::DEFAULT_PROXY_URL,
        ));
        let direct = Arc::new(DirectTransport::new(node_client.clone()));

        let selector = TransportSelector::new(vec![
            onion as Arc<dyn Transport>,
            overlay.clone() as Arc<dyn Transport>,
            direct as Arc<dyn Transport>,
        ]);

        let swarm = SwarmResolver::new(Arc::new(HttpSwarmSource::new(node_client)));

        Ok(Self {
            config,
            directory,
            paths,
            swarm,
            selector,
            clock: Arc::new(ClockOffset::new()),
            overlay: Some(overlay),
        })
    }

    /// Assemble from explicit parts; tests and embedders substitute fakes
    pub fn with_components(
        config: NetworkConfig,
        directory: Arc<NodeDirectory>,
        paths: Arc<PathPool>,
        swarm: SwarmResolver,
        selector: TransportSelector,
    ) -> Result<Self> {
        Ok(Self {
            config: config.validated()?,
            directory,
            paths,
            swarm,
            selector,
            clock: Arc::new(ClockOffset::new()),
            overlay: None,
        })
    }

    /// The shared network clock (local time plus resynced offset)
    pub fn clock(&self) -> &ClockOffset {
        &self.clock
    }

    /// RPC builder signing as `auth`
    pub fn rpc<'a>(&'a self, auth: &'a dyn AuthenticationMethod) -> SnodeRpc<'a> {
        SnodeRpc::new(auth, &self.clock)
    }

    /// The node directory owned by this instance
    pub fn directory(&self) -> &Arc<NodeDirectory> {
        &self.directory
    }

    /// The path pool owned by this instance
    pub fn paths(&self) -> &Arc<PathPool> {
        &self.paths
    }

    /// Record the overlay daemon's bootstrap state
    pub fn set_overlay_ready(&self, ready: bool) {
        if let Some(overlay) = &self.overlay {
            overlay.set_ready(ready);
        }
    }

    /// The swarm responsible for an identifier
    pub async fn swarm_for(&self, identifier: &str) -> Result<std::collections::HashSet<StorageNode>> {
        let pool = self.directory.ensure_pool().await?;
        self.swarm.swarm_for(identifier, &pool).await
    }

    /// A random member of the identifier's swarm, for load balancing
    pub async fn random_swarm_member(&self, identifier: &str) -> Result<StorageNode> {
        let pool = self.directory.ensure_pool().await?;
        self.swarm.random_swarm_member(identifier, &pool).await
    }

    /// Send a prepared request.
    ///
    /// Note that retry-after-clock-resync cannot refresh `sig_timestamp`
    /// inside an already-built body; callers issuing signed requests should
    /// prefer [`SnodeNetwork::send_with`] so each attempt is rebuilt.
    pub async fn send(
        &self,
        request: &SendRequest,
        destination: &Destination,
        timeout: Option<Duration>,
    ) -> Result<(ResponseInfo, Bytes)> {
        let request = request.clone();
        self.send_with(move || Ok(request.clone()), destination, timeout)
            .await
    }

    /// Send a request rebuilt per attempt, applying the retry policy.
    ///
    /// The builder runs once per attempt so signed timestamps pick up clock
    /// resyncs and rebuilt paths get fresh envelopes.
    pub async fn send_with<F>(
        &self,
        build: F,
        destination: &Destination,
        timeout: Option<Duration>,
    ) -> Result<(ResponseInfo, Bytes)>
    where
        F: Fn() -> Result<SendRequest> + Send,
    {
        let timeout = timeout.unwrap_or(self.config.request_timeout);
        let mut retry = RetryState::new();

        loop {
            let transport = self.selector.select(self.config.enabled_layers)?;
            let request = build()?;
            if request.body.to_bytes()?.len() > MAX_REQUEST_BODY_SIZE {
                return Err(NetworkError::MaxFileSizeExceeded);
            }

            let attempt =
                tokio::time::timeout(timeout, transport.send(&request, destination)).await;

            let error = match attempt {
                // Caller-side timeout: the in-flight task is dropped. The
                // path is only condemned if the transport observed a bad
                // hop signal before cancellation (it marks death itself).
                Err(_) => NetworkError::TimedOut,
                Ok(Ok((info, body))) if info.is_success() => return Ok((info, body)),
                Ok(Ok((info, body))) => NetworkError::HttpRequestFailed {
                    code: info.code,
                    body: String::from_utf8(body.to_vec()).ok(),
                },
                Ok(Err(error)) => error,
            };

            let action = classify(&error);
            debug!(error = %error, ?action, "send attempt failed");
            retry.admit(&action)?;

            match action {
                ErrorAction::RetryAfterClockResync { network_time_ms } => {
                    if let Some(network_time_ms) = network_time_ms {
                        self.clock.resync(network_time_ms);
                    } else {
                        warn!("clock skew response carried no timestamp");
                    }
                }
                ErrorAction::RetryOnRebuiltPath => {
                    // The transport condemned the path already; the next
                    // attempt rebuilds to the target count lazily.
                }
                ErrorAction::RetryAfterPoolRefresh => {
                    self.directory.invalidate_and_refresh().await?;
                }
                // admit() surfaced these.
                ErrorAction::Fatal(_) | ErrorAction::Surface(_) => unreachable!(),
            }
        }
    }

    /// Send a request to a random member of `identifier`'s swarm.
    ///
    /// A 421 response means the chosen node no longer belongs to the
    /// swarm; the cached mapping is invalidated and the send retried once
    /// against a freshly resolved member.
    pub async fn send_to_swarm(
        &self,
        identifier: &str,
        request: &SendRequest,
        timeout: Option<Duration>,
    ) -> Result<(ResponseInfo, Bytes)> {
        let mut swarm_refreshed = false;
        loop {
            let member = self.random_swarm_member(identifier).await?;
            match self
                .send(request, &Destination::Node(member), timeout)
                .await
            {
                Err(NetworkError::HttpRequestFailed { code, .. })
                    if code == STATUS_WRONG_SWARM && !swarm_refreshed =>
                {
                    warn!(identifier, "snode no longer in swarm, refreshing mapping");
                    self.swarm.invalidate(identifier);
                    swarm_refreshed = true;
                }
                other => return other,
            }
        }
    }

    /// Send on behalf of a background poller.
    ///
    /// `still_valid` is the poller's cancellation gate: once it returns
    /// false, no completion may produce observable side effects; the
    /// result is discarded and `Cancelled` returned.
    pub async fn send_while_valid<F>(
        &self,
        request: &SendRequest,
        destination: &Destination,
        timeout: Option<Duration>,
        still_valid: F,
    ) -> Result<(ResponseInfo, Bytes)>
    where
        F: Fn() -> bool + Send + Sync,
    {
        if !still_valid() {
            return Err(NetworkError::Cancelled);
        }
        let result = self.send(request, destination, timeout).await;
        if !still_valid() {
            return Err(NetworkError::Cancelled);
        }
        result
    }
}
