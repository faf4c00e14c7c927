//! Layered onion encryption for multi-hop requests.
//!
//! A request is encrypted once per hop, innermost layer first, so each hop
//! can decrypt exactly one layer and learn only the next hop's address.
//! Every layer uses a fresh ephemeral X25519 keypair against the hop's
//! static X25519 key; the shared secret is expanded with HKDF-SHA256 into a
//! ChaCha20-Poly1305 key.
//!
//! Wire format per layer:
//!
//! ```text
//! [ephemeral pubkey (32)][nonce (12)][ciphertext + tag]
//! ```
//!
//! Layer plaintext:
//!
//! ```text
//! [kind (1)][metadata len (2, BE)][metadata JSON][inner payload]
//! ```
//!
//! Responses travel back re-encrypted by each hop with the same per-hop
//! symmetric key (no ephemeral key needed); the caller unwinds them
//! guard-first with the keys retained in [`OnionSession`].

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{NetworkError, Result};
use crate::path::OnionPath;
use crate::types::Destination;

/// ChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// X25519 public key size in bytes
pub const EPHEMERAL_KEY_SIZE: usize = 32;

/// Minimum valid request layer: ephemeral key + nonce + tag + kind byte
pub const MIN_LAYER_SIZE: usize = EPHEMERAL_KEY_SIZE + NONCE_SIZE + TAG_SIZE + 1;

/// HKDF salt prefix, domain-separating layer keys from any other use of the
/// same shared secret
const HKDF_SALT: &[u8] = b"snode-onion-layer-v2";

/// HKDF info string for layer key expansion
const LAYER_KEY_INFO: &[u8] = b"layer-key";

/// Symmetric key for one onion layer
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// What a hop should do with the inner payload after decrypting its layer
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Forward the inner payload to another storage node
    Relay = 0x01,

    /// Relay the inner payload to an external server
    Proxy = 0x02,

    /// This hop is the destination; the inner payload is the request itself
    Final = 0x03,
}

impl LayerKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(LayerKind::Relay),
            0x02 => Some(LayerKind::Proxy),
            0x03 => Some(LayerKind::Final),
            _ => None,
        }
    }
}

/// Relay metadata: where the decrypting hop sends the inner payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayMeta {
    /// Next node's ed25519 key (hex), so the hop can authenticate it
    pub ed25519: String,
    /// Next node's IP
    pub ip: String,
    /// Next node's port
    pub port: u16,
}

/// Proxy metadata: the external server the exit hop relays to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyMeta {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// URL scheme
    pub scheme: String,
    /// Server's X25519 key (hex); the server decrypts the innermost layer
    pub target: String,
}

/// A decrypted layer, as seen by the hop that owns the key
#[derive(Debug)]
pub enum DecryptedLayer {
    /// Forward `inner` to the node described by `meta`
    Relay {
        /// Next hop address
        meta: RelayMeta,
        /// Remaining encrypted payload
        inner: Vec<u8>,
    },
    /// Relay `inner` to the external server described by `meta`
    Proxy {
        /// Exit target
        meta: ProxyMeta,
        /// Remaining encrypted payload
        inner: Vec<u8>,
    },
    /// This hop is the destination; `payload` is the plaintext request
    Final {
        /// Decrypted request bytes
        payload: Vec<u8>,
    },
}

/// The fully wrapped envelope handed to the guard hop
#[derive(Debug, Clone)]
pub struct OnionEnvelope {
    /// Outermost ciphertext
    pub payload: Vec<u8>,
}

/// Per-request key material for unwinding the response
///
/// Keys are ordered outermost-first: guard, middle, exit, destination.
pub struct OnionSession {
    keys: Vec<SymmetricKey>,
}

impl OnionSession {
    /// Number of layers this session established
    pub fn layer_count(&self) -> usize {
        self.keys.len()
    }

    /// Peel every response layer, guard-first, returning the plaintext the
    /// destination produced
    pub fn unwrap_response(&self, response: &[u8]) -> Result<Vec<u8>> {
        let mut current = response.to_vec();
        for key in &self.keys {
            current = decrypt_with_key(key, &current)?;
        }
        Ok(current)
    }
}

fn derive_layer_key(shared_secret: &[u8; 32]) -> SymmetricKey {
    let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared_secret);
    let mut key_bytes = [0u8; 32];
    hkdf.expand(LAYER_KEY_INFO, &mut key_bytes)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    SymmetricKey::from_bytes(key_bytes)
}

fn encrypt_with_key(key: &SymmetricKey, plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes()).expect("key is always 32 bytes");

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("encryption cannot fail with valid inputs");

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    output
}

fn decrypt_with_key(key: &SymmetricKey, encrypted: &[u8]) -> Result<Vec<u8>> {
    if encrypted.len() < NONCE_SIZE + TAG_SIZE {
        return Err(NetworkError::InvalidResponse(format!(
            "onion layer too short: {} bytes",
            encrypted.len()
        )));
    }
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes()).expect("key is always 32 bytes");
    let nonce = Nonce::from_slice(&encrypted[..NONCE_SIZE]);
    cipher
        .decrypt(nonce, &encrypted[NONCE_SIZE..])
        .map_err(|_| NetworkError::InvalidResponse("onion layer authentication failed".into()))
}

/// Encrypt one layer to a hop's static X25519 key.
///
/// Returns the wire bytes and the derived symmetric key (retained for
/// response unwinding).
fn seal_layer(
    hop_x25519: &[u8; 32],
    kind: LayerKind,
    metadata: &[u8],
    inner: &[u8],
) -> Result<(Vec<u8>, SymmetricKey)> {
    if metadata.len() > u16::MAX as usize {
        return Err(NetworkError::InvalidJson("layer metadata too large".into()));
    }

    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(*hop_x25519));
    let key = derive_layer_key(shared.as_bytes());

    let mut plaintext = Vec::with_capacity(3 + metadata.len() + inner.len());
    plaintext.push(kind as u8);
    plaintext.extend_from_slice(&(metadata.len() as u16).to_be_bytes());
    plaintext.extend_from_slice(metadata);
    plaintext.extend_from_slice(inner);

    let encrypted = encrypt_with_key(&key, &plaintext);

    let mut output = Vec::with_capacity(EPHEMERAL_KEY_SIZE + encrypted.len());
    output.extend_from_slice(ephemeral_public.as_bytes());
    output.extend_from_slice(&encrypted);
    Ok((output, key))
}

/// Decrypt one request layer with the hop's static X25519 secret.
///
/// This is what a hop (or the destination) executes; the client side only
/// needs it in tests that simulate the network.
pub fn decrypt_layer(hop_secret: &StaticSecret, layer: &[u8]) -> Result<DecryptedLayer> {
    if layer.len() < MIN_LAYER_SIZE {
        return Err(NetworkError::InvalidResponse(format!(
            "onion layer too short: {} bytes, need at least {}",
            layer.len(),
            MIN_LAYER_SIZE
        )));
    }

    let ephemeral_bytes: [u8; 32] = layer[..EPHEMERAL_KEY_SIZE]
        .try_into()
        .expect("length checked above");
    let shared = hop_secret.diffie_hellman(&PublicKey::from(ephemeral_bytes));
    let key = derive_layer_key(shared.as_bytes());

    let plaintext = decrypt_with_key(&key, &layer[EPHEMERAL_KEY_SIZE..])?;
    if plaintext.len() < 3 {
        return Err(NetworkError::InvalidResponse("onion layer underflow".into()));
    }

    let kind = LayerKind::from_byte(plaintext[0]).ok_or_else(|| {
        NetworkError::InvalidResponse(format!("unknown onion layer kind {:#04x}", plaintext[0]))
    })?;
    let meta_len = u16::from_be_bytes([plaintext[1], plaintext[2]]) as usize;
    if plaintext.len() < 3 + meta_len {
        return Err(NetworkError::InvalidResponse("onion metadata truncated".into()));
    }
    let metadata = &plaintext[3..3 + meta_len];
    let inner = plaintext[3 + meta_len..].to_vec();

    match kind {
        LayerKind::Relay => {
            let meta: RelayMeta = serde_json::from_slice(metadata)
                .map_err(|e| NetworkError::InvalidResponse(format!("bad relay metadata: {}", e)))?;
            Ok(DecryptedLayer::Relay { meta, inner })
        }
        LayerKind::Proxy => {
            let meta: ProxyMeta = serde_json::from_slice(metadata)
                .map_err(|e| NetworkError::InvalidResponse(format!("bad proxy metadata: {}", e)))?;
            Ok(DecryptedLayer::Proxy { meta, inner })
        }
        LayerKind::Final => Ok(DecryptedLayer::Final { payload: inner }),
    }
}

/// Encrypt a response layer with a hop's established symmetric key.
///
/// Hops apply this on the way back; exposed for tests that play the
/// network's role.
pub fn encrypt_response_layer(key: &SymmetricKey, payload: &[u8]) -> Vec<u8> {
    encrypt_with_key(key, payload)
}

/// Wrap a plaintext request for transmission through `path` to `destination`.
///
/// Layers, innermost first:
/// 1. `Final` layer encrypted to the destination's own X25519 key.
/// 2. Exit-hop layer: `Relay` addressing the destination node, or `Proxy`
///    when the destination is an external server (the node case needs one
///    fewer address indirection: the relay metadata is just a node address).
/// 3. Middle-hop layer relaying to the exit.
/// 4. Guard-hop layer relaying to the middle; this is what goes on the wire.
pub fn wrap(
    payload: &[u8],
    destination: &Destination,
    path: &OnionPath,
) -> Result<(OnionEnvelope, OnionSession)> {
    let destination_key = destination.x25519_public_key_bytes()?;
    let (mut current, destination_layer_key) =
        seal_layer(&destination_key, LayerKind::Final, &[], payload)?;

    let hops = path.hops();
    // Exit layer: tell the exit hop where the inner blob goes.
    let exit_key_bytes = hops[2].x25519_public_key_bytes()?;
    let (kind, metadata) = match destination {
        Destination::Node(node) => (
            LayerKind::Relay,
            serde_json::to_vec(&RelayMeta {
                ed25519: node.ed25519_pubkey.clone(),
                ip: node.ip.clone(),
                port: node.port,
            })?,
        ),
        Destination::Server {
            host,
            port,
            scheme,
            x25519_pubkey,
        } => (
            LayerKind::Proxy,
            serde_json::to_vec(&ProxyMeta {
                host: host.clone(),
                port: *port,
                scheme: scheme.clone(),
                target: x25519_pubkey.clone(),
            })?,
        ),
    };
    let (exit_layer, exit_layer_key) = seal_layer(&exit_key_bytes, kind, &metadata, &current)?;
    current = exit_layer;

    // Middle and guard layers each relay to the next hop inward.
    let mut keys_inner_first = vec![destination_layer_key, exit_layer_key];
    for (hop_index, next_index) in [(1usize, 2usize), (0, 1)] {
        let hop_key_bytes = hops[hop_index].x25519_public_key_bytes()?;
        let next = &hops[next_index];
        let metadata = serde_json::to_vec(&RelayMeta {
            ed25519: next.ed25519_pubkey.clone(),
            ip: next.ip.clone(),
            port: next.port,
        })?;
        let (layer, key) = seal_layer(&hop_key_bytes, LayerKind::Relay, &metadata, &current)?;
        current = layer;
        keys_inner_first.push(key);
    }

    keys_inner_first.reverse();
    Ok((
        OnionEnvelope { payload: current },
        OnionSession {
            keys: keys_inner_first,
        },
    ))
}
