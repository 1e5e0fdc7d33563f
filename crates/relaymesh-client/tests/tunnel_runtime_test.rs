//! Tunnel runtime tests
//!
//! The test plays the router on the far end of in-memory duplex streams. Time
//! is paused so reconnect pauses and keepalives advance instantly.

use std::{
    future::Future,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use relaymesh_client::{TunnelClient, TunnelConfig, TunnelError, TunnelEvent, TunnelStatus};
use relaymesh_core::{
    Environment, SystemEnv,
    transport::{Transport, read_frame, write_frame},
};
use relaymesh_proto::{
    Address, Destination, LogicalAddr, Payload,
    payloads::{Data, RegisterAck, RegisterReject, RejectReason, Suspect},
};
use tokio::{io::DuplexStream, sync::mpsc};

/// Hands the far end of every connection to the test.
#[derive(Clone)]
struct DuplexTransport {
    reachable: Arc<AtomicBool>,
    accepted: mpsc::UnboundedSender<DuplexStream>,
}

#[async_trait]
impl Transport for DuplexTransport {
    type Stream = DuplexStream;

    async fn connect(&self, _remote: &str) -> io::Result<Self::Stream> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "router down"));
        }
        let (client, router) = tokio::io::duplex(64 * 1024);
        let _ = self.accepted.send(router);
        Ok(client)
    }
}

struct Harness {
    client: TunnelClient,
    events: mpsc::UnboundedReceiver<TunnelEvent>,
    accepted: mpsc::UnboundedReceiver<DuplexStream>,
    reachable: Arc<AtomicBool>,
}

/// [`SystemEnv`] that counts sleeps.
#[derive(Clone, Default)]
struct CountingEnv {
    sleeps: Arc<AtomicUsize>,
}

impl Environment for CountingEnv {
    fn now(&self) -> Instant {
        SystemEnv.now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        SystemEnv.random_bytes(buffer);
    }
}

fn spawn(reachable: bool) -> Harness {
    spawn_with(reachable, SystemEnv)
}

fn spawn_with(reachable: bool, env: impl Environment) -> Harness {
    let reachable = Arc::new(AtomicBool::new(reachable));
    let (accepted_tx, accepted) = mpsc::unbounded_channel();
    let transport = DuplexTransport { reachable: Arc::clone(&reachable), accepted: accepted_tx };

    let config = TunnelConfig::new(vec!["router:12001".to_string()], "demo", Address::new("A", 7));
    let (client, events) = TunnelClient::spawn(config, transport, env);
    Harness { client, events, accepted, reachable }
}

/// Next frame from the client, skipping keepalives.
async fn next_payload(router: &mut DuplexStream) -> Payload {
    loop {
        let frame = read_frame(router).await.unwrap().expect("client closed the stream");
        match Payload::from_frame(&frame).unwrap() {
            Payload::Ping => continue,
            payload => return payload,
        }
    }
}

async fn reply(router: &mut DuplexStream, payload: Payload) {
    write_frame(router, &payload.into_frame().unwrap()).await.unwrap();
}

/// Accept the next connection and acknowledge its registration.
async fn accept_and_ack(harness: &mut Harness, session_id: u64) -> DuplexStream {
    let mut router = harness.accepted.recv().await.unwrap();
    let Payload::Register(register) = next_payload(&mut router).await else {
        panic!("expected REGISTER");
    };
    assert_eq!(register.address, Address::new("A", 7));
    reply(&mut router, Payload::RegisterAck(RegisterAck { group: register.group, session_id })).await;
    router
}

/// Next non-status event.
async fn next_event(events: &mut mpsc::UnboundedReceiver<TunnelEvent>) -> TunnelEvent {
    loop {
        match events.recv().await.unwrap() {
            TunnelEvent::Status(_) => continue,
            event => return event,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn registers_and_relays_messages() {
    let mut harness = spawn(true);
    let mut router = accept_and_ack(&mut harness, 3).await;

    harness.client.connect().await.unwrap();
    assert_eq!(harness.client.status(), TunnelStatus::Registered {
        router: "router:12001".to_string(),
        session_id: 3
    });

    harness.client.send(Destination::All, Bytes::from_static(b"hello")).await.unwrap();
    let Payload::Data(data) = next_payload(&mut router).await else {
        panic!("expected DATA");
    };
    assert_eq!(data.sender, Address::new("A", 7));
    assert_eq!(data.payload, Bytes::from_static(b"hello"));

    let inbound = Data {
        group: "demo".to_string(),
        sender: Address::new("B", 2),
        destination: Destination::Member(LogicalAddr::new("A")),
        payload: Bytes::from_static(b"hi A"),
    };
    reply(&mut router, Payload::Data(inbound)).await;
    reply(&mut router, Payload::Suspect(Suspect { group: "demo".to_string(), logical: LogicalAddr::new("B") }))
        .await;

    assert_eq!(next_event(&mut harness.events).await, TunnelEvent::Message {
        sender: Address::new("B", 2),
        payload: Bytes::from_static(b"hi A")
    });
    assert_eq!(next_event(&mut harness.events).await, TunnelEvent::Suspect {
        logical: LogicalAddr::new("B")
    });
}

#[tokio::test(start_paused = true)]
async fn unreachable_router_is_retried_in_background() {
    let mut harness = spawn(false);

    let err = harness.client.connect().await.unwrap_err();
    assert!(matches!(err, TunnelError::Connectivity { attempts: 1 }));

    let send = harness.client.send(Destination::All, Bytes::from_static(b"x")).await;
    assert!(matches!(send, Err(TunnelError::NotConnected)));

    harness.reachable.store(true, Ordering::SeqCst);
    let _router = accept_and_ack(&mut harness, 1).await;
    harness.client.connect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rejected_registration_is_surfaced() {
    let mut harness = spawn(true);

    let mut router = harness.accepted.recv().await.unwrap();
    let Payload::Register(register) = next_payload(&mut router).await else {
        panic!("expected REGISTER");
    };
    reply(&mut router, Payload::RegisterReject(RegisterReject {
        group: register.group,
        address: register.address,
        reason: RejectReason::DuplicateAddress,
    }))
    .await;

    let err = harness.client.connect().await.unwrap_err();
    assert!(matches!(err, TunnelError::RegistrationConflict { reason: RejectReason::DuplicateAddress }));
    assert!(read_frame(&mut router).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn lost_connection_reregisters() {
    let mut harness = spawn(true);
    let router = accept_and_ack(&mut harness, 1).await;
    harness.client.connect().await.unwrap();

    drop(router);

    let _router = accept_and_ack(&mut harness, 2).await;
    loop {
        if let TunnelEvent::Status(TunnelStatus::Registered { session_id: 2, .. }) =
            harness.events.recv().await.unwrap()
        {
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn stop_unregisters() {
    let mut harness = spawn(true);
    let mut router = accept_and_ack(&mut harness, 1).await;
    harness.client.connect().await.unwrap();

    harness.client.stop().await;

    let Payload::Unregister(unregister) = next_payload(&mut router).await else {
        panic!("expected UNREGISTER");
    };
    assert_eq!(unregister.logical, LogicalAddr::new("A"));
    assert!(read_frame(&mut router).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn keepalive_runs_on_environment_timers() {
    let env = CountingEnv::default();
    let mut harness = spawn_with(true, env.clone());
    let mut router = accept_and_ack(&mut harness, 1).await;
    harness.client.connect().await.unwrap();

    let frame = read_frame(&mut router).await.unwrap().unwrap();
    assert_eq!(Payload::from_frame(&frame).unwrap(), Payload::Ping);
    assert!(env.sleeps.load(Ordering::SeqCst) > 0);
}
