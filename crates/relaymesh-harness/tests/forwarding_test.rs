//! Router forwarding over the simulated network.

use std::time::Duration;

use bytes::Bytes;
use relaymesh_client::{TunnelClient, TunnelConfig, TunnelEvent};
use relaymesh_harness::{ROUTER_PORT, SimEnv, SimTransport, run_router};
use relaymesh_proto::{Address, Destination, LogicalAddr};
use tokio::sync::mpsc;

const GROUP: &str = "forwarding";

fn tunnel(name: &str) -> (TunnelClient, mpsc::UnboundedReceiver<TunnelEvent>) {
    let config = TunnelConfig::new(vec![format!("router:{ROUTER_PORT}")], GROUP, Address::new(name, 1));
    TunnelClient::spawn(config, SimTransport, SimEnv::with_seed(9))
}

async fn next_message(events: &mut mpsc::UnboundedReceiver<TunnelEvent>) -> Option<(Address, Bytes)> {
    loop {
        match events.recv().await? {
            TunnelEvent::Message { sender, payload } => return Some((sender, payload)),
            _ => continue,
        }
    }
}

#[test]
fn data_for_unknown_member_is_dropped_silently() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(60)).build();

    sim.host("router", || run_router(5));

    sim.client("B", async {
        let (client, mut events) = tunnel("B");
        client.connect().await?;

        let first = tokio::time::timeout(Duration::from_secs(20), next_message(&mut events)).await?;
        assert_eq!(first, Some((Address::new("A", 1), Bytes::from_static(b"for B"))));

        // Nothing else is addressed to B
        let more = tokio::time::timeout(Duration::from_secs(3), next_message(&mut events)).await;
        assert!(more.is_err());

        client.stop().await;
        Ok(())
    });

    sim.client("A", async {
        // Let B register first
        tokio::time::sleep(Duration::from_secs(2)).await;

        let (client, mut events) = tunnel("A");
        client.connect().await?;

        let ghost = Destination::Member(LogicalAddr::new("ghost"));
        client.send(ghost, Bytes::from_static(b"for nobody")).await?;
        client.send(Destination::Member(LogicalAddr::new("B")), Bytes::from_static(b"for B")).await?;

        // The drop is not reported back to the sender
        let echo = tokio::time::timeout(Duration::from_secs(3), next_message(&mut events)).await;
        assert!(echo.is_err());

        tokio::time::sleep(Duration::from_secs(5)).await;
        client.stop().await;
        Ok(())
    });

    sim.run().unwrap();
}
