//! Failure classification and retry policy.
//!
//! Raw transport/HTTP failures are mapped to a closed set of actions; this
//! is the only place in the crate that decides to retry. Every other
//! component fails fast and propagates.
//!
//! | Condition | Action |
//! |---|---|
//! | HTTP 406 (clock skew) | resync offset from response timestamp, retry once |
//! | HTTP 401 (bad signature) | fatal for this request |
//! | Hop timeout / malformed hop response | condemn the path, retry on a rebuilt one, bounded |
//! | Pool exhausted | invalidate+refresh the directory, retry once |
//! | Any other non-2xx | surface, no automatic retry |
//!
//! A second clock-skew response after a resync is fatal: once the node's
//! own timestamp has been adopted, remaining disagreement is not a fixable
//! local offset.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::warn;

use crate::error::NetworkError;

/// HTTP status a node returns when the request timestamp is out of range
pub const STATUS_CLOCK_SKEW: u16 = 406;

/// HTTP status a node returns on signature verification failure
pub const STATUS_BAD_SIGNATURE: u16 = 401;

/// HTTP status a node returns when it no longer belongs to the target's
/// swarm; handled by the swarm-aware send, not the generic retry loop,
/// since only the caller knows which cached mapping to drop
pub const STATUS_WRONG_SWARM: u16 = 421;

/// Bounded number of retries on a rebuilt path per logical request
pub const MAX_PATH_RETRIES: u8 = 2;

/// What to do about a classified failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorAction {
    /// Adopt the node's timestamp as the clock offset, then retry
    RetryAfterClockResync {
        /// Node-reported wall clock (ms), when the response carried one
        network_time_ms: Option<u64>,
    },

    /// Condemn the owning path, rebuild, and retry
    RetryOnRebuiltPath,

    /// Invalidate and refresh the node directory, then retry
    RetryAfterPoolRefresh,

    /// Do not retry; the local signing state or clock is wrong
    Fatal(NetworkError),

    /// Do not retry; surface the error as-is
    Surface(NetworkError),
}

/// Map a raw failure to its policy action
pub fn classify(error: &NetworkError) -> ErrorAction {
    match error {
        NetworkError::HttpRequestFailed { code, body } if *code == STATUS_CLOCK_SKEW => {
            ErrorAction::RetryAfterClockResync {
                network_time_ms: body.as_deref().and_then(extract_timestamp_ms),
            }
        }
        NetworkError::HttpRequestFailed { code, .. } if *code == STATUS_BAD_SIGNATURE => {
            ErrorAction::Fatal(NetworkError::SignatureVerificationFailed)
        }
        error if error.is_hop_attributable() => ErrorAction::RetryOnRebuiltPath,
        NetworkError::InsufficientNodes => ErrorAction::RetryAfterPoolRefresh,
        other => ErrorAction::Surface(other.clone()),
    }
}

/// Pull a node-reported timestamp out of a 406 response body
fn extract_timestamp_ms(body: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("timestamp")
        .or_else(|| value.get("t"))
        .and_then(Value::as_u64)
}

/// Per-request retry budgets.
///
/// Clock resync and pool refresh are attempted once each; path rebuilds are
/// bounded by [`MAX_PATH_RETRIES`].
#[derive(Debug, Default)]
pub struct RetryState {
    clock_resynced: bool,
    pool_refreshed: bool,
    path_retries: u8,
}

impl RetryState {
    /// Fresh budgets for one logical request
    pub fn new() -> Self {
        Self::default()
    }

    /// Spend budget for `action`; returns the error to surface when the
    /// budget is exhausted.
    pub fn admit(&mut self, action: &ErrorAction) -> Result<(), NetworkError> {
        match action {
            ErrorAction::RetryAfterClockResync { .. } => {
                if self.clock_resynced {
                    warn!("clock still skewed after resync, giving up");
                    return Err(NetworkError::ClockOutOfSync);
                }
                self.clock_resynced = true;
                Ok(())
            }
            ErrorAction::RetryAfterPoolRefresh => {
                if self.pool_refreshed {
                    return Err(NetworkError::InsufficientNodes);
                }
                self.pool_refreshed = true;
                Ok(())
            }
            ErrorAction::RetryOnRebuiltPath => {
                if self.path_retries >= MAX_PATH_RETRIES {
                    // Internal hop detail stays in the logs; callers see a
                    // generic connectivity failure.
                    return Err(NetworkError::TimedOut);
                }
                self.path_retries += 1;
                Ok(())
            }
            ErrorAction::Fatal(error) | ErrorAction::Surface(error) => Err(error.clone()),
        }
    }
}

/// The client's view of network wall-clock time.
///
/// Nodes reject requests whose `sig_timestamp` disagrees with their clock;
/// after a 406 the offset is resynced from the node's own timestamp.
#[derive(Debug, Default)]
pub struct ClockOffset {
    offset_ms: AtomicI64,
}

impl ClockOffset {
    /// Zero-offset clock
    pub fn new() -> Self {
        Self::default()
    }

    fn local_now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Current network time in unix milliseconds
    pub fn network_now_ms(&self) -> u64 {
        let local = Self::local_now_ms() as i64;
        (local + self.offset_ms.load(Ordering::Relaxed)).max(0) as u64
    }

    /// Adopt a node-reported timestamp as the authoritative clock
    pub fn resync(&self, network_time_ms: u64) {
        let offset = network_time_ms as i64 - Self::local_now_ms() as i64;
        warn!(offset_ms = offset, "resyncing clock offset from node timestamp");
        self.offset_ms.store(offset, Ordering::Relaxed);
    }

    /// The current offset in milliseconds
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }
}
