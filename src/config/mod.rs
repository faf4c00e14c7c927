// Configuration surface for the snode network layer
//
// The host application owns persistence of these values; they are handed
// in at construction and read at send time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, Result};
use crate::types::StorageNode;

/// Which network layers a send is allowed to use.
///
/// At least one layer must be enabled; the selector walks them in the fixed
/// preference order onion, overlay, direct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledLayers {
    /// Onion-routed requests through built paths
    pub onion: bool,

    /// Requests through the anonymity overlay network
    pub overlay: bool,

    /// Direct HTTPS to the destination
    pub direct: bool,
}

impl EnabledLayers {
    /// Validate that the set is non-empty
    pub fn validated(self) -> Result<Self> {
        if !self.onion && !self.overlay && !self.direct {
            return Err(NetworkError::TransportsNotReady);
        }
        Ok(self)
    }

    /// Onion-only, the default posture
    pub fn onion_only() -> Self {
        Self {
            onion: true,
            overlay: false,
            direct: false,
        }
    }

    /// Everything enabled, preferring onion
    pub fn all() -> Self {
        Self {
            onion: true,
            overlay: true,
            direct: true,
        }
    }
}

impl Default for EnabledLayers {
    fn default() -> Self {
        Self::onion_only()
    }
}

/// Construction-time configuration for [`crate::client::SnodeNetwork`]
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Enabled network layers
    pub enabled_layers: EnabledLayers,

    /// Default per-send timeout
    pub request_timeout: Duration,

    /// Trusted bootstrap nodes for directory cold start
    pub seeds: Vec<StorageNode>,
}

impl NetworkConfig {
    /// Configuration over the given seed nodes, onion-only, 10s timeout
    pub fn new(seeds: Vec<StorageNode>) -> Self {
        Self {
            enabled_layers: EnabledLayers::default(),
            request_timeout: Duration::from_secs(10),
            seeds,
        }
    }

    /// Set the enabled layers
    pub fn with_enabled_layers(mut self, layers: EnabledLayers) -> Self {
        self.enabled_layers = layers;
        self
    }

    /// Set the default send timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validated(self) -> Result<Self> {
        self.enabled_layers.validated()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_layer_set_is_rejected() {
        let layers = EnabledLayers {
            onion: false,
            overlay: false,
            direct: false,
        };
        assert!(layers.validated().is_err());
    }

    #[test]
    fn default_is_onion_only() {
        let layers = EnabledLayers::default();
        assert!(layers.onion);
        assert!(!layers.overlay);
        assert!(!layers.direct);
        assert!(layers.validated().is_ok());
    }

    #[test]
    fn config_validation_covers_layers() {
        let config = NetworkConfig::new(Vec::new()).with_enabled_layers(EnabledLayers {
            onion: false,
            overlay: false,
            direct: false,
        });
        assert!(config.validated().is_err());
    }
}
