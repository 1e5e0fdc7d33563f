//! tokio runtime for the router.
//!
//! One actor task owns the [`RouterDriver`]. The accept loop spawns a task per
//! connection; each task decodes frames into [`RouterEvent`]s for the actor
//! and writes the frames the actor queues for its session. Generic over
//! [`Listener`] so the same code runs on TCP and on a simulated network.

use std::{collections::HashMap, io};

use async_trait::async_trait;
use relaymesh_core::{
    Environment,
    transport::{Listener, read_frame, write_frame},
};
use relaymesh_proto::Frame;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch},
};

use crate::{
    config::RouterConfig,
    driver::{RouterAction, RouterDriver, RouterEvent},
    error::ServerError,
};

enum ActorMessage {
    Accepted { session_id: u64, outbound: mpsc::UnboundedSender<Outbound> },
    Event(RouterEvent),
}

enum Outbound {
    Frame(Frame),
    Close,
}

/// Router service.
pub struct Router<E: Environment> {
    config: RouterConfig,
    env: E,
}

impl<E: Environment> Router<E> {
    /// Create a router. Nothing runs until [`serve`](Self::serve).
    pub fn new(config: RouterConfig, env: E) -> Self {
        Self { config, env }
    }

    /// Accept connections until `shutdown` turns true.
    ///
    /// Open sessions are closed on shutdown.
    pub async fn serve<L: Listener>(
        self,
        mut listener: L,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ServerError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = RouterDriver::new(self.config.clone());
        let actor = tokio::spawn(run_actor(
            driver,
            self.env.clone(),
            events_rx,
            self.config,
            shutdown.clone(),
        ));

        let mut next_session: u64 = 1;
        let result = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(error) => break Err(ServerError::Accept(error)),
                    };

                    let session_id = next_session;
                    next_session += 1;
                    tracing::debug!(session_id, %peer, "accepted connection");

                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    let accepted = ActorMessage::Accepted { session_id, outbound: outbound_tx };
                    if events_tx.send(accepted).is_err() {
                        break Err(ServerError::ActorStopped);
                    }
                    tokio::spawn(run_connection(session_id, stream, outbound_rx, events_tx.clone()));
                }
                () = shutdown_requested(&mut shutdown) => {
                    tracing::info!("router shutting down");
                    break Ok(());
                }
            }
        };

        drop(events_tx);
        let _ = actor.await;
        result
    }
}

async fn run_actor<E: Environment>(
    mut driver: RouterDriver,
    env: E,
    mut events: mpsc::UnboundedReceiver<ActorMessage>,
    config: RouterConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut outbound: HashMap<u64, mpsc::UnboundedSender<Outbound>> = HashMap::new();
    let mut next_tick = env.now() + config.tick_interval;

    loop {
        let until_tick = next_tick.saturating_duration_since(env.now());
        let event = tokio::select! {
            message = events.recv() => match message {
                Some(ActorMessage::Accepted { session_id, outbound: sender }) => {
                    outbound.insert(session_id, sender);
                    RouterEvent::ConnectionAccepted { session_id }
                },
                Some(ActorMessage::Event(event)) => {
                    if let RouterEvent::ConnectionClosed { session_id, .. } = &event {
                        outbound.remove(session_id);
                    }
                    event
                },
                None => break,
            },
            () = env.sleep(until_tick) => {
                next_tick = env.now() + config.tick_interval;
                RouterEvent::Tick
            },
            () = shutdown_requested(&mut shutdown) => break,
        };

        for action in driver.process_event(event, env.now()) {
            match action {
                RouterAction::SendToSession { session_id, frame } => {
                    if let Some(sender) = outbound.get(&session_id) {
                        let _ = sender.send(Outbound::Frame(frame));
                    }
                },
                RouterAction::CloseConnection { session_id, reason } => {
                    tracing::debug!(session_id, %reason, "closing connection");
                    if let Some(sender) = outbound.remove(&session_id) {
                        let _ = sender.send(Outbound::Close);
                    }
                },
            }
        }
    }

    for sender in outbound.into_values() {
        let _ = sender.send(Outbound::Close);
    }
}

async fn run_connection<S>(
    session_id: u64,
    stream: S,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<ActorMessage>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let read_loop = async {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    let event = RouterEvent::FrameReceived { session_id, frame };
                    if events.send(ActorMessage::Event(event)).is_err() {
                        return "router stopped".to_string();
                    }
                },
                Ok(None) => return "peer closed".to_string(),
                Err(error) => return format!("read failed: {error}"),
            }
        }
    };

    let write_loop = async {
        while let Some(Outbound::Frame(frame)) = outbound.recv().await {
            if let Err(error) = write_frame(&mut writer, &frame).await {
                return format!("write failed: {error}");
            }
        }
        let _ = writer.shutdown().await;
        "closed by router".to_string()
    };

    let reason = tokio::select! {
        reason = read_loop => reason,
        reason = write_loop => reason,
    };

    let _ = events.send(ActorMessage::Event(RouterEvent::ConnectionClosed { session_id, reason }));
}

/// Resolves once the watch value is true. A dropped sender never resolves.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// TCP listener for production.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind to `address`.
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind { address: address.to_string(), source })?;
        Ok(Self { listener })
    }

    /// Bound address.
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Listener for TcpAcceptor {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(Self::Stream, String)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer.to_string()))
    }
}
