// Types module for the snode network layer
//
// This module defines the common data model shared by the directory,
// path builder, transports, and RPC surface.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, Result};

pub mod namespace;

pub use namespace::Namespace;

/// Storage node information
///
/// Identity is the pair of public keys; nodes are replaced wholesale on
/// every directory refresh rather than mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StorageNode {
    /// Ed25519 public key (hex)
    pub ed25519_pubkey: String,

    /// X25519 public key (hex), used for onion layer key agreement
    pub x25519_pubkey: String,

    /// IP address
    pub ip: String,

    /// HTTPS port
    pub port: u16,

    /// Reported storage server version, if known
    #[serde(default)]
    pub version: Option<String>,
}

impl StorageNode {
    /// Base URL for direct RPC against this node
    pub fn rpc_url(&self) -> String {
        format!("https://{}:{}/storage_rpc/v1", self.ip, self.port)
    }

    /// URL of this node's onion request endpoint
    pub fn onion_url(&self) -> String {
        format!("https://{}:{}/onion_req/v2", self.ip, self.port)
    }

    /// The node's X25519 public key as raw bytes
    pub fn x25519_public_key_bytes(&self) -> Result<[u8; 32]> {
        let bytes = hex::decode(&self.x25519_pubkey)
            .map_err(|e| NetworkError::ParsingFailed(format!("invalid x25519 key hex: {}", e)))?;
        bytes
            .try_into()
            .map_err(|_| NetworkError::ParsingFailed("x25519 key must be 32 bytes".into()))
    }
}

/// Cached pool of candidate storage nodes
#[derive(Debug, Clone)]
pub struct NodePool {
    /// Current candidate nodes
    pub nodes: HashSet<StorageNode>,

    /// When the pool was last replaced
    pub refreshed_at: Option<Instant>,

    /// Whether the pool has ever been populated since cold start
    pub ever_populated: bool,
}

impl NodePool {
    /// An empty, never-populated pool (cold start state)
    pub fn empty() -> Self {
        Self {
            nodes: HashSet::new(),
            refreshed_at: None,
            ever_populated: false,
        }
    }

    /// Replace the pool contents atomically-by-value
    pub fn replace(&mut self, nodes: HashSet<StorageNode>) {
        self.nodes = nodes;
        self.refreshed_at = Some(Instant::now());
        self.ever_populated = true;
    }
}

/// Final target of an onion-wrapped request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A storage node in the network
    Node(StorageNode),

    /// An external server reached via the exit hop
    Server {
        /// Host name
        host: String,
        /// Port
        port: u16,
        /// URL scheme ("https" or "http")
        scheme: String,
        /// The server's X25519 public key (hex)
        x25519_pubkey: String,
    },
}

impl Destination {
    /// X25519 public key bytes of the destination, for the innermost layer
    pub fn x25519_public_key_bytes(&self) -> Result<[u8; 32]> {
        let hex_key = match self {
            Destination::Node(node) => &node.x25519_pubkey,
            Destination::Server { x25519_pubkey, .. } => x25519_pubkey,
        };
        let bytes = hex::decode(hex_key)
            .map_err(|e| NetworkError::ParsingFailed(format!("invalid x25519 key hex: {}", e)))?;
        bytes
            .try_into()
            .map_err(|_| NetworkError::ParsingFailed("x25519 key must be 32 bytes".into()))
    }
}

/// Request body, tagged so the wrapper and demuxer know the encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// No body
    Empty,

    /// A JSON value, serialized as-is
    Json(serde_json::Value),

    /// A UTF-8 string (sent verbatim, base64 on the onion wire)
    Text(String),

    /// Raw bytes
    Bytes(Bytes),
}

impl Body {
    /// Render the body to wire bytes
    pub fn to_bytes(&self) -> Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Json(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            Body::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Body::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// An HTTP-like request addressed to a destination
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// HTTP verb
    pub method: String,

    /// Endpoint path (e.g. "/storage_rpc/v1")
    pub endpoint: String,

    /// Headers to present to the destination
    pub headers: HashMap<String, String>,

    /// Tagged body
    pub body: Body,
}

impl SendRequest {
    /// A POST carrying a JSON RPC envelope, the common case
    pub fn rpc(method: &str, params: serde_json::Value) -> Self {
        Self {
            method: "POST".to_string(),
            endpoint: "/storage_rpc/v1".to_string(),
            headers: HashMap::new(),
            body: Body::Json(serde_json::json!({
                "method": method,
                "params": params,
            })),
        }
    }

    /// Add a header
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }
}

/// Metadata accompanying a completed response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseInfo {
    /// HTTP-like status code
    pub code: u16,

    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ResponseInfo {
    /// Whether the status code is in the success range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}
