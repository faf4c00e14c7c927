// Snode network layer entry point

// Module declarations
pub mod auth;
pub mod batch;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod onion;
pub mod path;
pub mod retry;
pub mod rpc;
pub mod swarm;
pub mod transport;
pub mod types;

// Re-export key components for easier access
pub use auth::{AuthenticationMethod, LocalKeyAuthentication, RequestSigner};
pub use batch::{compose, demux, BatchMode, BatchSubRequest, BatchSubResponse};
pub use client::SnodeNetwork;
pub use config::{EnabledLayers, NetworkConfig};
pub use directory::NodeDirectory;
pub use error::{NetworkError, Result};
pub use path::{OnionPath, PathPool};
pub use retry::ClockOffset;
pub use rpc::SnodeRpc;
pub use swarm::SwarmResolver;
pub use transport::{Transport, TransportKind, TransportSelector};
pub use types::{Body, Destination, Namespace, ResponseInfo, SendRequest, StorageNode};

/// Returns the version of the library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
