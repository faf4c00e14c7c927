//! Transport abstraction and selection.
//!
//! Exactly one transport serves a logical request. The selector walks the
//! fixed preference order (onion, overlay, direct), skipping layers the
//! configuration disables and transports whose polled readiness is false;
//! transports are never raced against each other.

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::EnabledLayers;
use crate::error::{NetworkError, Result};
use crate::types::{Destination, ResponseInfo, SendRequest};

pub mod direct;
pub mod onion;
pub mod overlay;

pub use direct::DirectTransport;
pub use onion::OnionTransport;
pub use overlay::OverlayTransport;

/// The closed set of transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Onion-routed through built paths
    Onion,

    /// Anonymity overlay network
    Overlay,

    /// Direct HTTPS
    Direct,
}

/// Preference order for transport selection
pub const PREFERENCE_ORDER: [TransportKind; 3] = [
    TransportKind::Onion,
    TransportKind::Overlay,
    TransportKind::Direct,
];

/// Uniform send contract over the underlying network mechanism
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which transport this is
    fn kind(&self) -> TransportKind;

    /// Whether the transport can serve a request right now.
    ///
    /// Polled at send time, never pushed.
    fn is_ready(&self) -> bool;

    /// Deliver `request` to `destination` and return the response.
    ///
    /// Non-2xx destination status codes are returned as responses, not
    /// errors; errors mean the transport itself failed to complete the
    /// exchange.
    async fn send(
        &self,
        request: &SendRequest,
        destination: &Destination,
    ) -> Result<(ResponseInfo, Bytes)>;
}

impl EnabledLayers {
    fn allows(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::Onion => self.onion,
            TransportKind::Overlay => self.overlay,
            TransportKind::Direct => self.direct,
        }
    }
}

/// Chooses the transport for each logical request
pub struct TransportSelector {
    transports: Vec<std::sync::Arc<dyn Transport>>,
}

impl TransportSelector {
    /// Create a selector over the available transports
    pub fn new(transports: Vec<std::sync::Arc<dyn Transport>>) -> Self {
        Self { transports }
    }

    /// Pick the first enabled, ready transport in preference order
    pub fn select(&self, layers: EnabledLayers) -> Result<std::sync::Arc<dyn Transport>> {
        for kind in PREFERENCE_ORDER {
            if !layers.allows(kind) {
                continue;
            }
            if let Some(transport) = self
                .transports
                .iter()
                .find(|transport| transport.kind() == kind)
            {
                if transport.is_ready() {
                    return Ok(transport.clone());
                }
            }
        }
        Err(NetworkError::TransportsNotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct MockTransport {
        kind: TransportKind,
        ready: bool,
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn send(
            &self,
            _request: &SendRequest,
            _destination: &Destination,
        ) -> Result<(ResponseInfo, Bytes)> {
            Ok((
                ResponseInfo {
                    code: 200,
                    headers: Default::default(),
                },
                Bytes::from_static(b"{}"),
            ))
        }
    }

    fn selector(states: &[(TransportKind, bool)]) -> TransportSelector {
        TransportSelector::new(
            states
                .iter()
                .map(|&(kind, ready)| {
                    Arc::new(MockTransport { kind, ready }) as Arc<dyn Transport>
                })
                .collect(),
        )
    }

    #[test]
    fn prefers_onion_when_ready() {
        let selector = selector(&[
            (TransportKind::Onion, true),
            (TransportKind::Overlay, true),
            (TransportKind::Direct, true),
        ]);
        let chosen = selector.select(EnabledLayers::all()).unwrap();
        assert_eq!(chosen.kind(), TransportKind::Onion);
    }

    #[test]
    fn skips_not_ready_transports() {
        let selector = selector(&[
            (TransportKind::Onion, false),
            (TransportKind::Overlay, false),
            (TransportKind::Direct, true),
        ]);
        let chosen = selector.select(EnabledLayers::all()).unwrap();
        assert_eq!(chosen.kind(), TransportKind::Direct);
    }

    #[test]
    fn disabled_layers_are_never_selected() {
        let selector = selector(&[
            (TransportKind::Onion, true),
            (TransportKind::Direct, true),
        ]);
        let layers = EnabledLayers {
            onion: false,
            overlay: false,
            direct: true,
        };
        let chosen = selector.select(layers).unwrap();
        assert_eq!(chosen.kind(), TransportKind::Direct);
    }

    #[test]
    fn nothing_ready_is_an_error() {
        let selector = selector(&[(TransportKind::Onion, false)]);
        let result = selector.select(EnabledLayers::all());
        assert!(matches!(result, Err(NetworkError::TransportsNotReady)));
    }
}
