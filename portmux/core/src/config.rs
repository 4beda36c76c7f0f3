//! Multiplexer Configuration
//!
//! Buffer sizing for channels and the pre-start connection queue.

use serde::{Deserialize, Serialize};

/// Configuration for the multiplexing layer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Wire-message buffer capacity per channel direction
    ///
    /// Sends block once this many messages are in flight; the layer makes
    /// no flow-control promises beyond this buffer.
    pub channel_capacity: usize,

    /// Maximum connection events buffered before the runner's main loop
    /// attaches its live acceptor
    ///
    /// Connections offered beyond this bound are rejected rather than
    /// silently dropped.
    pub pending_connection_limit: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
            pending_connection_limit: 32,
        }
    }
}

impl MuxConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `PORTMUX_CHANNEL_CAPACITY`: wire buffer per channel direction
    /// - `PORTMUX_PENDING_CONNECTIONS`: pre-start connection queue bound
    ///
    /// Unset or unparsable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            channel_capacity: std::env::var("PORTMUX_CHANNEL_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.channel_capacity),
            pending_connection_limit: std::env::var("PORTMUX_PENDING_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.pending_connection_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = MuxConfig::default();
        assert_eq!(config.channel_capacity, 100);
        assert_eq!(config.pending_connection_limit, 32);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = MuxConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: MuxConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.channel_capacity, config.channel_capacity);
    }
}
