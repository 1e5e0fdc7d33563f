//! relaymesh-router binary.

use std::time::Duration;

use clap::Parser;
use relaymesh_core::SystemEnv;
use relaymesh_router::{Router, RouterConfig, ServerError, TcpAcceptor};
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

/// Relay router for relaymesh groups
#[derive(Debug, Parser)]
#[command(name = "relaymesh-router", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:12001")]
    bind: String,

    /// Most members a single group may hold
    #[arg(long, default_value_t = 1024)]
    max_members: usize,

    /// Seconds a connection has to register
    #[arg(long, default_value_t = 5)]
    register_timeout_secs: u64,

    /// Seconds of silence before a registered connection is dropped
    #[arg(long, default_value_t = 15)]
    idle_timeout_secs: u64,

    /// Milliseconds between timeout checks
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,
}

impl Args {
    fn into_config(self) -> RouterConfig {
        RouterConfig {
            bind_address: self.bind,
            max_members_per_group: self.max_members,
            register_timeout: Duration::from_secs(self.register_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            tick_interval: Duration::from_millis(self.tick_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Args::parse().into_config();
    let listener = TcpAcceptor::bind(&config.bind_address).await?;
    tracing::info!(address = %config.bind_address, "router listening");

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received");
            let _ = stop_tx.send(true);
        }
    });

    Router::new(config, SystemEnv).serve(listener, stop_rx).await
}
