//! Anonymity-overlay transport.
//!
//! Requests are handed to a locally running overlay daemon that forwards
//! them through its own network. The daemon takes time to bootstrap after
//! process start; until it reports ready this transport is skipped by the
//! selector.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{NetworkError, Result};
use crate::types::{Body, Destination, ResponseInfo, SendRequest};

use super::{Transport, TransportKind};

/// Default local endpoint of the overlay daemon's HTTP proxy
pub const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:4343/proxy";

/// Sends requests through a local overlay-network daemon
pub struct OverlayTransport {
    client: reqwest::Client,
    proxy_url: String,
    ready: AtomicBool,
}

impl OverlayTransport {
    /// Build over the daemon's proxy endpoint
    pub fn new(client: reqwest::Client, proxy_url: impl Into<String>) -> Self {
        Self {
            client,
            proxy_url: proxy_url.into(),
            ready: AtomicBool::new(false),
        }
    }

    /// Record the daemon's bootstrap state; the selector polls it at send
    /// time
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    fn target_for(destination: &Destination) -> String {
        match destination {
            Destination::Node(node) => format!("https://{}:{}", node.ip, node.port),
            Destination::Server {
                host, port, scheme, ..
            } => format!("{}://{}:{}", scheme, host, port),
        }
    }
}

#[async_trait]
impl Transport for OverlayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Overlay
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    async fn send(
        &self,
        request: &SendRequest,
        destination: &Destination,
    ) -> Result<(ResponseInfo, Bytes)> {
        if !self.is_ready() {
            return Err(NetworkError::TransportsNotReady);
        }

        let body_bytes = match &request.body {
            Body::Empty => Bytes::new(),
            body => body.to_bytes()?,
        };

        let response = self
            .client
            .post(&self.proxy_url)
            .header("x-target", Self::target_for(destination))
            .header("x-endpoint", &request.endpoint)
            .header("x-method", &request.method)
            .body(body_bytes)
            .send()
            .await?;

        let code = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(key, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (key.to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;
        Ok((ResponseInfo { code, headers }, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StorageNode;

    fn transport() -> OverlayTransport {
        OverlayTransport::new(reqwest::Client::new(), DEFAULT_PROXY_URL)
    }

    #[test]
    fn starts_not_ready() {
        let overlay = transport();
        assert!(!overlay.is_ready());
        overlay.set_ready(true);
        assert!(overlay.is_ready());
    }

    #[tokio::test]
    async fn send_before_bootstrap_is_rejected() {
        let overlay = transport();
        let node = StorageNode {
            ed25519_pubkey: "aa".into(),
            x25519_pubkey: "bb".into(),
            ip: "10.0.0.1".into(),
            port: 22020,
            version: None,
        };
        let request = SendRequest::rpc("info", serde_json::json!({}));
        let result = overlay.send(&request, &Destination::Node(node)).await;
        assert!(matches!(result, Err(NetworkError::TransportsNotReady)));
    }
}
