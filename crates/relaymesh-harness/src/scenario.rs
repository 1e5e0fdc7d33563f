//! Building blocks for simulated scenarios.

use std::time::Duration;

use relaymesh_client::{Channel, ChannelConfig, TunnelConfig};
use relaymesh_core::View;
use relaymesh_proto::Address;
use relaymesh_router::{Router, RouterConfig};
use tokio::sync::watch;

use crate::{SimEnv, SimListener};

/// Port routers listen on inside the simulation.
pub const ROUTER_PORT: u16 = 12001;

/// Run a router on the current turmoil host until the host is stopped.
pub async fn run_router(seed: u64) -> turmoil::Result {
    let listener = SimListener::bind(&format!("0.0.0.0:{ROUTER_PORT}")).await?;
    tracing::info!(seed, port = ROUTER_PORT, "simulated router listening");
    // The sender stays alive for as long as the router runs
    let (_stop, stopped) = watch::channel(false);

    let config = RouterConfig { bind_address: format!("0.0.0.0:{ROUTER_PORT}"), ..RouterConfig::default() };
    Router::new(config, SimEnv::with_seed(seed)).serve(listener, stopped).await?;
    Ok(())
}

/// Channel settings for member `name` of `group`, using the given router hosts.
pub fn member_config(routers: &[&str], group: &str, name: &str, incarnation: u64) -> ChannelConfig {
    let routers = routers.iter().map(|host| format!("{host}:{ROUTER_PORT}")).collect();
    ChannelConfig::new(TunnelConfig::new(routers, group, Address::new(name, incarnation)))
}

/// Wait until the channel's view satisfies `accept`, up to `timeout`.
pub async fn wait_for_view(
    channel: &Channel,
    timeout: Duration,
    accept: impl Fn(&View) -> bool,
) -> Option<View> {
    let mut views = channel.subscribe();
    let wait = async {
        loop {
            if let Some(view) = views.borrow_and_update().as_ref()
                && accept(view)
            {
                return Some(view.clone());
            }
            if views.changed().await.is_err() {
                return None;
            }
        }
    };
    tokio::time::timeout(timeout, wait).await.ok().flatten()
}
