//! Client configuration.

use tandem_core::SignalingConfig;

/// Default STUN server handed to the peer transport.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Default capacity of the channel event queue toward the runtime.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Everything a client runtime needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Link timings and reconnect policy
    pub signaling: SignalingConfig,
    /// ICE server URLs (`stun:` or `turn:`)
    pub ice_servers: Vec<String>,
    /// Inbound events and status changes buffered ahead of the runtime
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig::default(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Replace the ICE server list. An empty list keeps the default.
    #[must_use]
    pub fn with_ice_servers(mut self, servers: Vec<String>) -> Self {
        if !servers.is_empty() {
            self.ice_servers = servers;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.channel_capacity, 64);
        assert_eq!(config.ice_servers, vec![DEFAULT_ICE_SERVER.to_string()]);
    }

    #[test]
    fn empty_ice_list_keeps_default() {
        let config = ClientConfig::default().with_ice_servers(Vec::new());
        assert_eq!(config.ice_servers.len(), 1);

        let config = ClientConfig::default().with_ice_servers(vec!["turn:relay.test".into()]);
        assert_eq!(config.ice_servers, vec!["turn:relay.test".to_string()]);
    }
}
