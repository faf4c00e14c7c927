//! End-to-end send flow over a scripted transport: RPC building, batch
//! composition/demux, retry policy, and the poller cancellation gate, all
//! through the public `SnodeNetwork` surface.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use rand::rngs::OsRng;

use snode_network::batch::{compose, demux, BatchMode};
use snode_network::directory::{NodeDirectory, NodeListSource};
use snode_network::rpc;
use snode_network::swarm::{SwarmResolver, SwarmSource};
use snode_network::transport::{Transport, TransportKind, TransportSelector};
use snode_network::{
    Body, Destination, EnabledLayers, LocalKeyAuthentication, Namespace, NetworkConfig,
    NetworkError, PathPool, ResponseInfo, SendRequest, SnodeNetwork, StorageNode,
};

/// Route crate logs to the test output, honoring `RUST_LOG`
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn node(index: u8) -> StorageNode {
    StorageNode {
        ed25519_pubkey: hex::encode([index; 32]),
        x25519_pubkey: hex::encode([index.wrapping_add(1); 32]),
        ip: format!("10.9.0.{}", index),
        port: 22020,
        version: None,
    }
}

struct StaticNodes;

#[async_trait]
impl NodeListSource for StaticNodes {
    async fn fetch_nodes(&self, _from: &StorageNode) -> Result<HashSet<StorageNode>, NetworkError> {
        Ok((0..20).map(node).collect())
    }
}

struct StaticSwarm;

#[async_trait]
impl SwarmSource for StaticSwarm {
    async fn fetch_swarm(
        &self,
        _from: &StorageNode,
        _identifier: &str,
    ) -> Result<HashSet<StorageNode>, NetworkError> {
        Ok((0..5).map(node).collect())
    }
}

/// Plays the network's role at the transport seam: returns scripted
/// responses and records the requests it saw.
struct ScriptedTransport {
    script: Mutex<Vec<Result<(ResponseInfo, Bytes), NetworkError>>>,
    seen: Mutex<Vec<SendRequest>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<(ResponseInfo, Bytes), NetworkError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Onion
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn send(
        &self,
        request: &SendRequest,
        _destination: &Destination,
    ) -> Result<(ResponseInfo, Bytes), NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());
        let mut script = self.script.lock();
        if script.is_empty() {
            return Err(NetworkError::PathFailure("script exhausted".into()));
        }
        script.remove(0)
    }
}

fn ok(body: &str) -> Result<(ResponseInfo, Bytes), NetworkError> {
    Ok((
        ResponseInfo {
            code: 200,
            headers: Default::default(),
        },
        Bytes::copy_from_slice(body.as_bytes()),
    ))
}

fn status(code: u16, body: &str) -> Result<(ResponseInfo, Bytes), NetworkError> {
    Ok((
        ResponseInfo {
            code,
            headers: Default::default(),
        },
        Bytes::copy_from_slice(body.as_bytes()),
    ))
}

fn network_over(transport: Arc<ScriptedTransport>) -> SnodeNetwork {
    init_tracing();
    let config = NetworkConfig::new(vec![node(200)])
        .with_enabled_layers(EnabledLayers::onion_only())
        .with_request_timeout(Duration::from_millis(500));
    let directory = Arc::new(NodeDirectory::new(vec![node(200)], Arc::new(StaticNodes)));
    let paths = Arc::new(PathPool::new(2));
    let swarm = SwarmResolver::new(Arc::new(StaticSwarm));
    let selector = TransportSelector::new(vec![transport as Arc<dyn Transport>]);
    SnodeNetwork::with_components(config, directory, paths, swarm, selector).unwrap()
}

#[tokio::test]
async fn signed_batch_round_trip() {
    let transport = ScriptedTransport::new(vec![ok(r#"{"results": [
        {"code": 200, "headers": {}, "body": {"messages": [{"hash": "h1"}]}},
        {"code": 200, "headers": {}, "body": {"hash": "h2"}}
    ]}"#)]);
    let network = network_over(transport.clone());

    let auth = LocalKeyAuthentication::new(SigningKey::generate(&mut OsRng));
    let rpc = network.rpc(&auth);
    let sub_requests = vec![
        rpc.retrieve("05aabb", Namespace::Default, None).unwrap(),
        rpc.store("05aabb", Namespace::Default, "aGk=", 86_400_000)
            .unwrap(),
    ];
    let request = compose(&sub_requests, BatchMode::Batch).unwrap();

    let destination = network.random_swarm_member("05aabb").await.unwrap();
    let (info, body) = network
        .send(&request, &Destination::Node(destination), None)
        .await
        .unwrap();
    assert_eq!(info.code, 200);

    let responses = demux(&body, &sub_requests).unwrap();
    assert_eq!(responses.len(), 2);
    assert!(responses[0].is_success());
    assert_eq!(responses[0].body.as_ref().unwrap()["messages"][0]["hash"], "h1");
    assert_eq!(responses[1].body.as_ref().unwrap()["hash"], "h2");

    // Both sub-requests carried authentication fields on the wire.
    let seen = transport.seen.lock();
    let wire = match &seen[0].body {
        Body::Json(value) => value.clone(),
        other => panic!("expected JSON body, got {:?}", other),
    };
    for entry in wire["params"]["requests"].as_array().unwrap() {
        assert!(entry["params"]["signature"].is_string());
        assert!(entry["params"]["pubkey_ed25519"].is_string());
    }
}

#[tokio::test]
async fn clock_resync_refreshes_signed_timestamp() {
    let skewed = 9_000_000_000_000u64;
    let transport = ScriptedTransport::new(vec![
        status(406, &format!(r#"{{"timestamp": {}}}"#, skewed)),
        ok("{}"),
    ]);
    let network = network_over(transport.clone());

    let auth = LocalKeyAuthentication::new(SigningKey::generate(&mut OsRng));
    let (info, _) = network
        .send_with(
            || {
                let sub_request = network
                    .rpc(&auth)
                    .retrieve("05aabb", Namespace::Default, None)?;
                Ok(rpc::into_send_request(sub_request))
            },
            &Destination::Node(node(3)),
            None,
        )
        .await
        .unwrap();
    assert_eq!(info.code, 200);

    // The retried attempt was rebuilt with the resynced clock.
    let seen = transport.seen.lock();
    assert_eq!(seen.len(), 2);
    let timestamp_of = |request: &SendRequest| match &request.body {
        Body::Json(value) => value["params"]["sig_timestamp"].as_u64().unwrap(),
        other => panic!("expected JSON body, got {:?}", other),
    };
    assert!(timestamp_of(&seen[0]) < skewed - 60_000);
    assert!(timestamp_of(&seen[1]) >= skewed - 60_000);
}

#[tokio::test]
async fn path_failures_are_retried_then_surface_generically() {
    let transport = ScriptedTransport::new(vec![
        Err(NetworkError::PathFailure("guard timeout".into())),
        Err(NetworkError::PathFailure("guard timeout".into())),
        Err(NetworkError::PathFailure("guard timeout".into())),
    ]);
    let network = network_over(transport.clone());

    let request = SendRequest::rpc("info", serde_json::json!({}));
    let result = network.send(&request, &Destination::Node(node(3)), None).await;

    // Hop detail stays internal; the caller sees a connectivity failure.
    assert!(matches!(result, Err(NetworkError::TimedOut)));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn hanging_send_times_out_and_cancels() {
    struct Hanging;

    #[async_trait]
    impl Transport for Hanging {
        fn kind(&self) -> TransportKind {
            TransportKind::Onion
        }

        fn is_ready(&self) -> bool {
            true
        }

        async fn send(
            &self,
            _request: &SendRequest,
            _destination: &Destination,
        ) -> Result<(ResponseInfo, Bytes), NetworkError> {
            futures::future::pending().await
        }
    }

    init_tracing();
    let config = NetworkConfig::new(vec![node(200)]);
    let directory = Arc::new(NodeDirectory::new(vec![node(200)], Arc::new(StaticNodes)));
    let paths = Arc::new(PathPool::new(2));
    let swarm = SwarmResolver::new(Arc::new(StaticSwarm));
    let selector = TransportSelector::new(vec![Arc::new(Hanging) as Arc<dyn Transport>]);
    let network =
        SnodeNetwork::with_components(config, directory, paths, swarm, selector).unwrap();

    let started = std::time::Instant::now();
    let result = network
        .send(
            &SendRequest::rpc("info", serde_json::json!({})),
            &Destination::Node(node(3)),
            Some(Duration::from_secs(2)),
        )
        .await;
    assert!(matches!(result, Err(NetworkError::TimedOut)));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn poller_gate_suppresses_late_completions() {
    let transport = ScriptedTransport::new(vec![ok("{}")]);
    let network = network_over(transport.clone());

    let valid = Arc::new(AtomicBool::new(true));
    // The predicate flips false while the send runs; the completed result
    // must be discarded.
    let gate = valid.clone();
    let result = network
        .send_while_valid(
            &SendRequest::rpc("info", serde_json::json!({})),
            &Destination::Node(node(3)),
            None,
            move || {
                let was_valid = gate.load(Ordering::SeqCst);
                gate.store(false, Ordering::SeqCst);
                was_valid
            },
        )
        .await;
    assert!(matches!(result, Err(NetworkError::Cancelled)));
    // The request itself may have been sent; only observable effects are
    // suppressed.
    assert!(transport.calls.load(Ordering::SeqCst) <= 1);
}
