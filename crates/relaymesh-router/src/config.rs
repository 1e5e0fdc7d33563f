//! Router configuration.

use std::time::Duration;

use relaymesh_core::connection::ConnectionConfig;

/// Router settings.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Address to listen on
    pub bind_address: String,
    /// Most bindings a single group may hold
    pub max_members_per_group: usize,
    /// Time a new connection has to register before it is dropped
    pub register_timeout: Duration,
    /// Silence tolerated from a registered connection
    pub idle_timeout: Duration,
    /// How often session timeouts are checked
    pub tick_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:12001".to_string(),
            max_members_per_group: 1024,
            register_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(15),
            tick_interval: Duration::from_millis(100),
        }
    }
}

impl RouterConfig {
    /// Keepalive settings for every session. The router answers pings but
    /// never sends them.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            register_timeout: self.register_timeout,
            idle_timeout: self.idle_timeout,
            heartbeat_interval: None,
        }
    }
}
