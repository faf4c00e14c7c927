// Request signing boundary
//
// The network layer never holds private key material. It consumes an
// `AuthenticationMethod` capability and uses it to sign the canonical byte
// string each authenticated endpoint prescribes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey};
use serde_json::Value;

use crate::error::{NetworkError, Result};
use crate::types::Namespace;

/// Capability that can sign arbitrary byte strings on behalf of an actor
///
/// The actor is usually the local user, but group operations substitute the
/// group's signing identity via `pubkey_override`.
pub trait AuthenticationMethod: Send + Sync {
    /// Produce an Ed25519 signature over `message`
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// Hex Ed25519 public key of the signing actor
    fn ed25519_public_key_hex(&self) -> String;

    /// Actor-specific public key override (e.g. a group identity)
    ///
    /// When present this replaces the account key in signed request bodies.
    fn pubkey_override(&self) -> Option<String> {
        None
    }
}

/// Authentication backed by a locally held Ed25519 key
///
/// The common case for a single account; group signing capabilities are
/// provided by the host application.
pub struct LocalKeyAuthentication {
    key: SigningKey,
}

impl LocalKeyAuthentication {
    /// Wrap an existing signing key
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }
}

impl AuthenticationMethod for LocalKeyAuthentication {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }

    fn ed25519_public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }
}

/// Signs storage-node request bodies over their canonical byte strings
pub struct RequestSigner<'a> {
    auth: &'a dyn AuthenticationMethod,
}

impl<'a> RequestSigner<'a> {
    /// Create a signer around an authentication capability
    pub fn new(auth: &'a dyn AuthenticationMethod) -> Self {
        Self { auth }
    }

    /// Canonical string for timestamped namespace operations:
    /// `endpoint || namespace || timestamp`
    pub fn namespaced_message(endpoint: &str, namespace: Namespace, timestamp_ms: u64) -> Vec<u8> {
        format!(
            "{}{}{}",
            endpoint,
            namespace.signature_component(),
            timestamp_ms
        )
        .into_bytes()
    }

    /// Canonical string for hash-list operations: `endpoint || hashes.joined()`
    pub fn hashes_message(endpoint: &str, hashes: &[String]) -> Vec<u8> {
        format!("{}{}", endpoint, hashes.join("")).into_bytes()
    }

    /// Canonical string for expiry updates: `"expire" || expiry || hashes.joined()`
    pub fn expire_message(expiry_ms: u64, hashes: &[String]) -> Vec<u8> {
        format!("expire{}{}", expiry_ms, hashes.join("")).into_bytes()
    }

    /// Append the authentication fields (`sig_timestamp`, `pubkey_ed25519`,
    /// `signature`) to a request body
    pub fn attach(
        &self,
        params: &mut Value,
        message: &[u8],
        timestamp_ms: Option<u64>,
    ) -> Result<()> {
        let object = params
            .as_object_mut()
            .ok_or_else(|| NetworkError::InvalidJson("signed params must be an object".into()))?;

        // Host-provided capabilities can fail (locked keystore, revoked
        // group credential); their errors surface uniformly as signing
        // failures.
        let signature = self.auth.sign(message).map_err(|e| match e {
            NetworkError::SigningFailed(_) => e,
            other => NetworkError::SigningFailed(other.to_string()),
        })?;
        if let Some(timestamp) = timestamp_ms {
            object.insert("sig_timestamp".into(), Value::from(timestamp));
        }
        let pubkey = self
            .auth
            .pubkey_override()
            .unwrap_or_else(|| self.auth.ed25519_public_key_hex());
        object.insert("pubkey_ed25519".into(), Value::from(pubkey));
        object.insert("signature".into(), Value::from(BASE64.encode(signature)));
        Ok(())
    }
}
