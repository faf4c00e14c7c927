//! Onion-routed transport.
//!
//! Requests are wrapped in one encryption layer per hop and handed to the
//! guard node of a live path; the response comes back layered the other
//! way and is unwound with the keys established during wrapping. Failures
//! attributable to a hop condemn the owning path immediately; the path
//! pool restores the target count on the next send.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use crate::directory::NodeDirectory;
use crate::error::{NetworkError, Result};
use crate::onion;
use crate::path::{GuardProbe, PathPool};
use crate::types::{Body, Destination, ResponseInfo, SendRequest};

use super::{Transport, TransportKind};

/// Sends requests through onion paths
pub struct OnionTransport {
    directory: Arc<NodeDirectory>,
    paths: Arc<PathPool>,
    probe: Arc<dyn GuardProbe>,
    client: reqwest::Client,
}

impl OnionTransport {
    /// Build over the shared directory, path pool, and guard probe
    pub fn new(
        directory: Arc<NodeDirectory>,
        paths: Arc<PathPool>,
        probe: Arc<dyn GuardProbe>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            directory,
            paths,
            probe,
            client,
        }
    }
}

/// Render the destination-visible request as the innermost plaintext
pub(crate) fn build_plaintext(request: &SendRequest) -> Result<Vec<u8>> {
    let body = match &request.body {
        Body::Empty => Value::Null,
        Body::Json(value) => value.clone(),
        // Non-JSON bodies are tagged so the destination knows the encoding.
        Body::Text(text) => serde_json::json!({ "encoding": "text", "data": text }),
        Body::Bytes(bytes) => serde_json::json!({
            "encoding": "base64",
            "data": BASE64.encode(bytes),
        }),
    };
    Ok(serde_json::to_vec(&serde_json::json!({
        "method": request.method,
        "endpoint": request.endpoint,
        "headers": request.headers,
        "body": body,
    }))?)
}

/// Parse the unwound response plaintext into response info and body bytes
pub(crate) fn parse_plaintext(plaintext: &[u8]) -> Result<(ResponseInfo, Bytes)> {
    let value: Value = serde_json::from_slice(plaintext)
        .map_err(|e| NetworkError::InvalidResponse(format!("onion response not JSON: {}", e)))?;

    let code = value
        .get("code")
        .and_then(Value::as_u64)
        .ok_or_else(|| NetworkError::InvalidResponse("onion response missing code".into()))?
        as u16;

    let headers: HashMap<String, String> = value
        .get("headers")
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(key, v)| v.as_str().map(|v| (key.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let body = match value.get("body") {
        None | Some(Value::Null) => Bytes::new(),
        Some(Value::String(text)) => Bytes::copy_from_slice(text.as_bytes()),
        Some(other) => Bytes::from(serde_json::to_vec(other)?),
    };

    Ok((ResponseInfo { code, headers }, body))
}

#[async_trait]
impl Transport for OnionTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Onion
    }

    fn is_ready(&self) -> bool {
        // Paths are built lazily on the first send.
        true
    }

    async fn send(
        &self,
        request: &SendRequest,
        destination: &Destination,
    ) -> Result<(ResponseInfo, Bytes)> {
        let pool = self.directory.ensure_pool().await?;
        self.paths.ensure_paths(&pool, self.probe.as_ref()).await?;
        let path = self
            .paths
            .select_path()
            .ok_or(NetworkError::InsufficientNodes)?;

        let plaintext = build_plaintext(request)?;
        let (envelope, session) = onion::wrap(&plaintext, destination, &path)?;

        debug!(guard = %path.guard().ip, "sending onion request");
        let response = self
            .client
            .post(path.guard().onion_url())
            .json(&serde_json::json!({ "payload": BASE64.encode(&envelope.payload) }))
            .send()
            .await
            .map_err(|e| {
                // The guard is the only hop we talk to; failing to complete
                // the exchange with it condemns the path.
                self.paths.mark_dead(&path);
                NetworkError::PathFailure(format!("guard {} unreachable: {}", path.guard().ip, e))
            })?;

        if !response.status().is_success() {
            self.paths.mark_dead(&path);
            return Err(NetworkError::PathFailure(format!(
                "guard {} rejected onion request with status {}",
                path.guard().ip,
                response.status()
            )));
        }

        let wire = response.text().await.map_err(|e| {
            self.paths.mark_dead(&path);
            NetworkError::PathFailure(format!("guard response body unreadable: {}", e))
        })?;
        let layered = BASE64.decode(wire.trim()).map_err(|e| {
            self.paths.mark_dead(&path);
            NetworkError::PathFailure(format!("guard response not base64: {}", e))
        })?;

        let plaintext = session.unwrap_response(&layered).map_err(|e| {
            self.paths.mark_dead(&path);
            NetworkError::PathFailure(format!("onion response unwind failed: {}", e))
        })?;

        parse_plaintext(&plaintext)
    }
}
