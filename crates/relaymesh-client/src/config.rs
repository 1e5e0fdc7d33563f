//! Client configuration.

use std::time::Duration;

use relaymesh_core::{MembershipConfig, connection::ConnectionConfig};
use relaymesh_proto::Address;

/// Tunnel settings.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Router addresses (`host:port`), tried in order
    pub routers: Vec<String>,
    /// Group to register in
    pub group: String,
    /// Local member address
    pub address: Address,
    /// Bound on one connect attempt
    pub connect_timeout: Duration,
    /// Pause between failed passes over the router list
    pub reconnect_interval: Duration,
    /// Failed passes tolerated before giving up, `None` to retry forever
    pub max_reconnect_attempts: Option<u32>,
    /// Time allowed for the router to acknowledge registration
    pub register_timeout: Duration,
    /// Keepalive ping interval once registered
    pub heartbeat_interval: Duration,
    /// Silence from the router tolerated before the connection is dropped
    pub idle_timeout: Duration,
    /// How often the runtime drives timers
    pub tick_interval: Duration,
}

impl TunnelConfig {
    /// Defaults for everything but the routers, group and address.
    pub fn new(routers: Vec<String>, group: impl Into<String>, address: Address) -> Self {
        Self {
            routers,
            group: group.into(),
            address,
            connect_timeout: Duration::from_secs(2),
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_attempts: None,
            register_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(15),
            tick_interval: Duration::from_millis(50),
        }
    }

    pub(crate) fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            register_timeout: self.register_timeout,
            idle_timeout: self.idle_timeout,
            heartbeat_interval: Some(self.heartbeat_interval),
        }
    }
}

/// Member channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Router connection
    pub tunnel: TunnelConfig,
    /// Join and merge timing
    pub membership: MembershipConfig,
    /// How often membership timers are driven
    pub tick_interval: Duration,
}

impl ChannelConfig {
    /// Default membership timing over `tunnel`.
    pub fn new(tunnel: TunnelConfig) -> Self {
        Self { tunnel, membership: MembershipConfig::default(), tick_interval: Duration::from_millis(50) }
    }
}
