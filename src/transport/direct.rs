//! Direct HTTPS transport.
//!
//! No anonymity: the destination sees the client's address. Used when the
//! host configuration enables it and no preferred layer is ready.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;

use crate::error::{NetworkError, Result};
use crate::types::{Body, Destination, ResponseInfo, SendRequest};

use super::{Transport, TransportKind};

/// Sends requests straight to the destination over HTTPS
pub struct DirectTransport {
    client: reqwest::Client,
}

impl DirectTransport {
    /// Build over the shared snode HTTP client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn url_for(destination: &Destination, endpoint: &str) -> String {
        match destination {
            Destination::Node(node) => format!("https://{}:{}{}", node.ip, node.port, endpoint),
            Destination::Server {
                host, port, scheme, ..
            } => format!("{}://{}:{}{}", scheme, host, port, endpoint),
        }
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn send(
        &self,
        request: &SendRequest,
        destination: &Destination,
    ) -> Result<(ResponseInfo, Bytes)> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| NetworkError::InvalidUrl(format!("bad method {}", request.method)))?;
        let url = Self::url_for(destination, &request.endpoint);

        let mut builder = self.client.request(method, &url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Text(text) => builder.body(text.clone()),
            Body::Bytes(bytes) => builder.body(bytes.clone()),
        };

        let response = builder.send().await?;
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

    #[test]
    fn node_urls_target_the_storage_port() {
        let node = StorageNode {
            ed25519_pubkey: "aa".into(),
            x25519_pubkey: "bb".into(),
            ip: "144.76.164.202".into(),
            port: 22021,
            version: None,
        };
        let url = DirectTransport::url_for(&Destination::Node(node), "/storage_rpc/v1");
        assert_eq!(url, "https://144.76.164.202:22021/storage_rpc/v1");
    }

    #[test]
    fn server_urls_honor_scheme() {
        let destination = Destination::Server {
            host: "open.example.org".into(),
            port: 80,
            scheme: "http".into(),
            x25519_pubkey: "cc".into(),
        };
        let url = DirectTransport::url_for(&destination, "/rooms");
        assert_eq!(url, "http://open.example.org:80/rooms");
    }
}
