//! Typed builders for the storage-node RPC surface.
//!
//! Every endpoint produces a [`BatchSubRequest`] so single calls and
//! batch/sequence composition share one code path; a standalone send just
//! wraps the sub-request in the `{"method", "params"}` RPC envelope.
//!
//! Authenticated operations sign the endpoint-specific canonical byte
//! string with the injected [`AuthenticationMethod`], timestamped with the
//! resynced network clock rather than the raw local one.

use serde_json::Value;

use crate::auth::{AuthenticationMethod, RequestSigner};
use crate::batch::BatchSubRequest;
use crate::error::Result;
use crate::retry::ClockOffset;
use crate::types::{Namespace, SendRequest};

/// Builds signed storage-node operations for one actor
pub struct SnodeRpc<'a> {
    auth: &'a dyn AuthenticationMethod,
    clock: &'a ClockOffset,
}

impl<'a> SnodeRpc<'a> {
    /// Create a builder over an authentication capability and the shared
    /// network clock
    pub fn new(auth: &'a dyn AuthenticationMethod, clock: &'a ClockOffset) -> Self {
        Self { auth, clock }
    }

    fn signer(&self) -> RequestSigner<'_> {
        RequestSigner::new(self.auth)
    }

    /// `retrieve`: fetch messages from a namespace.
    ///
    /// Signed except for legacy group namespaces, whose reads are
    /// unauthenticated on the wire.
    pub fn retrieve(
        &self,
        pubkey: &str,
        namespace: Namespace,
        last_hash: Option<&str>,
    ) -> Result<BatchSubRequest> {
        let mut params = serde_json::json!({
            "pubkey": pubkey,
            "namespace": namespace,
            "last_hash": last_hash.unwrap_or(""),
        });

        if namespace.requires_read_auth() {
            let timestamp = self.clock.network_now_ms();
            let message = RequestSigner::namespaced_message("retrieve", namespace, timestamp);
            self.signer()
                .attach(&mut params, &message, Some(timestamp))?;
        }

        Ok(BatchSubRequest {
            method: "retrieve".into(),
            params,
        })
    }

    /// `store`: persist a message in a namespace
    pub fn store(
        &self,
        pubkey: &str,
        namespace: Namespace,
        data_b64: &str,
        ttl_ms: u64,
    ) -> Result<BatchSubRequest> {
        let timestamp = self.clock.network_now_ms();
        let mut params = serde_json::json!({
            "pubkey": pubkey,
            "namespace": namespace,
            "data": data_b64,
            "ttl": ttl_ms,
            "timestamp": timestamp,
        });

        let message = RequestSigner::namespaced_message("store", namespace, timestamp);
        self.signer()
            .attach(&mut params, &message, Some(timestamp))?;

        Ok(BatchSubRequest {
            method: "store".into(),
            params,
        })
    }

    /// `delete`: remove specific messages by hash
    pub fn delete(&self, pubkey: &str, message_hashes: &[String]) -> Result<BatchSubRequest> {
        let mut params = serde_json::json!({
            "pubkey": pubkey,
            "messages": message_hashes,
        });

        let message = RequestSigner::hashes_message("delete", message_hashes);
        self.signer().attach(&mut params, &message, None)?;

        Ok(BatchSubRequest {
            method: "delete".into(),
            params,
        })
    }

    /// `delete_all`: remove every message in a namespace (or all of them)
    pub fn delete_all(&self, pubkey: &str, namespace: Namespace) -> Result<BatchSubRequest> {
        let timestamp = self.clock.network_now_ms();
        let mut params = serde_json::json!({
            "pubkey": pubkey,
            "namespace": namespace,
        });

        let message = RequestSigner::namespaced_message("delete_all", namespace, timestamp);
        self.signer()
            .attach(&mut params, &message, Some(timestamp))?;

        Ok(BatchSubRequest {
            method: "delete_all".into(),
            params,
        })
    }

    /// `expire`: update the expiry of stored messages
    pub fn expire(
        &self,
        pubkey: &str,
        message_hashes: &[String],
        expiry_ms: u64,
    ) -> Result<BatchSubRequest> {
        let mut params = serde_json::json!({
            "pubkey": pubkey,
            "messages": message_hashes,
            "expiry": expiry_ms,
        });

        let message = RequestSigner::expire_message(expiry_ms, message_hashes);
        self.signer().attach(&mut params, &message, None)?;

        Ok(BatchSubRequest {
            method: "expire".into(),
            params,
        })
    }
}

/// `info`: unauthenticated node status query
pub fn info() -> BatchSubRequest {
    BatchSubRequest {
        method: "info".into(),
        params: Value::Object(Default::default()),
    }
}

/// `ons_resolve`: proxied name-service lookup
pub fn ons_resolve(type_code: u16, name_hash_b64: &str) -> BatchSubRequest {
    BatchSubRequest {
        method: "oxend_request".into(),
        params: serde_json::json!({
            "endpoint": "ons_resolve",
            "params": { "type": type_code, "name_hash": name_hash_b64 },
        }),
    }
}

/// `get_snodes_for_pubkey`: swarm membership query
pub fn get_snodes_for_pubkey(pubkey: &str) -> BatchSubRequest {
    BatchSubRequest {
        method: "get_snodes_for_pubkey".into(),
        params: serde_json::json!({ "pubkey": pubkey }),
    }
}

/// Wrap a sub-request as a standalone RPC send
pub fn into_send_request(sub_request: BatchSubRequest) -> SendRequest {
    SendRequest::rpc(&sub_request.method, sub_request.params)
}
