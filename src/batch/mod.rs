//! Batch and sequence request composition.
//!
//! Multiple authenticated storage-node operations are packed into a single
//! `/batch` or `/sequence` call; the heterogeneous responses come back as
//! one entry per sub-request, in input order. The two verbs share a wire
//! shape, with `sequence` only changing server-side semantics (stop on
//! first failure), so the composer and demuxer are identical.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::{NetworkError, Result};
use crate::types::SendRequest;

/// Whether sub-requests run independently or stop on first failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Every sub-request runs; failures do not abort siblings
    Batch,

    /// Server stops at the first failing sub-request
    Sequence,
}

impl BatchMode {
    fn method(&self) -> &'static str {
        match self {
            BatchMode::Batch => "batch",
            BatchMode::Sequence => "sequence",
        }
    }
}

/// One operation inside a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchSubRequest {
    /// Endpoint name (e.g. "retrieve")
    pub method: String,

    /// Endpoint parameters, already signed where required
    pub params: Value,
}

/// One entry of a demuxed batch response
#[derive(Debug, Clone)]
pub struct BatchSubResponse {
    /// HTTP-like status code of this sub-request
    pub code: u16,

    /// Sub-response headers
    pub headers: HashMap<String, String>,

    /// Parsed body, when parseable
    pub body: Option<Value>,

    /// Set when the entry carried a body that could not be interpreted;
    /// never true while `body` is `Some`
    pub failed_to_parse: bool,
}

impl BatchSubResponse {
    /// Whether the sub-request succeeded
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Pack sub-requests into a single wire-level call
pub fn compose(requests: &[BatchSubRequest], mode: BatchMode) -> Result<SendRequest> {
    if requests.is_empty() {
        return Err(NetworkError::InvalidJson("batch cannot be empty".into()));
    }
    let params = serde_json::json!({ "requests": requests });
    Ok(SendRequest::rpc(mode.method(), params))
}

/// Parse a batch response body into one entry per input request.
///
/// Accepts either a bare array or a `{"results": [...]}` envelope. Fails the
/// whole batch with `ParsingFailed` when the response arity does not match
/// the request arity; an individual non-2xx sub-status does not.
pub fn demux(body: &[u8], requests: &[BatchSubRequest]) -> Result<Vec<BatchSubResponse>> {
    let parsed: Value = serde_json::from_slice(body)
        .map_err(|e| NetworkError::ParsingFailed(format!("batch response not JSON: {}", e)))?;

    let entries = match &parsed {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(object) => object
            .get("results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                NetworkError::ParsingFailed("batch response missing results array".into())
            })?,
        _ => {
            return Err(NetworkError::ParsingFailed(
                "batch response is neither array nor envelope".into(),
            ))
        }
    };

    if entries.len() != requests.len() {
        return Err(NetworkError::ParsingFailed(format!(
            "batch arity mismatch: sent {}, received {}",
            requests.len(),
            entries.len()
        )));
    }

    Ok(entries.iter().map(parse_entry).collect())
}

fn parse_entry(entry: &Value) -> BatchSubResponse {
    let code = entry
        .get("code")
        .and_then(Value::as_u64)
        .map(|code| code as u16);

    let headers = entry
        .get("headers")
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(key, value)| {
                    value.as_str().map(|v| (key.clone(), v.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    match code {
        Some(code) => {
            let body = entry.get("body").cloned().filter(|body| !body.is_null());
            BatchSubResponse {
                code,
                headers,
                body,
                failed_to_parse: false,
            }
        }
        // An entry without a status code cannot be interpreted at all, but
        // must not abort its siblings.
        None => BatchSubResponse {
            code: 0,
            headers,
            body: None,
            failed_to_parse: true,
        },
    }
}
