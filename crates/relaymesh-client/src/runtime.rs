//! tokio runtime for the tunnel.
//!
//! [`TunnelClient::spawn`] starts one task that owns the [`Tunnel`] and the
//! router connection. Connect attempts and the read side of the connection
//! run in helper tasks that report back with a generation number, so results
//! from a connection that has since been dropped are ignored.

use std::{collections::VecDeque, io, sync::Arc};

use bytes::Bytes;
use relaymesh_core::{
    Environment,
    transport::{Transport, read_frame, write_frame},
};
use relaymesh_proto::{Address, Destination, Frame, FrameFlags, LogicalAddr};
use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    config::TunnelConfig,
    error::TunnelError,
    tunnel::{Tunnel, TunnelAction, TunnelStatus},
};

/// Notification from the tunnel task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEvent {
    /// A group message forwarded by the router.
    Message {
        /// Router-verified sender
        sender: Address,
        /// Message body
        payload: Bytes,
    },
    /// The router lost a member's connection.
    Suspect {
        /// Lost member
        logical: LogicalAddr,
    },
    /// Tunnel status changed.
    Status(TunnelStatus),
}

enum Command {
    Send {
        destination: Destination,
        payload: Bytes,
        flags: FrameFlags,
        reply: oneshot::Sender<Result<(), TunnelError>>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
}

enum Internal<S> {
    Connected { generation: u64, result: io::Result<S> },
    Frame { generation: u64, frame: Frame },
    ReadEnded { generation: u64, reason: String },
}

/// Handle to a running tunnel task.
pub struct TunnelClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<TunnelStatus>,
    task: JoinHandle<()>,
}

impl TunnelClient {
    /// Start the tunnel. Inbound messages, suspects and status changes arrive
    /// on the returned receiver in router order.
    pub fn spawn<T, E>(
        config: TunnelConfig,
        transport: T,
        env: E,
    ) -> (Self, mpsc::UnboundedReceiver<TunnelEvent>)
    where
        T: Transport,
        E: Environment,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(TunnelStatus::Idle);

        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            tunnel: Tunnel::new(config),
            transport: Arc::new(transport),
            env,
            events: events_tx,
            status: status_tx,
            internal: internal_tx,
            generation: 0,
            writer: None,
            connecting: None,
            reader: None,
        };
        let task = tokio::spawn(worker.run(commands_rx, internal_rx));

        (Self { commands: commands_tx, status: status_rx, task }, events_rx)
    }

    /// Wait for the outcome of the first pass over the router list.
    ///
    /// # Errors
    ///
    /// - `Connectivity` if no router was reachable; the tunnel keeps retrying
    ///   in the background
    /// - `Exhausted` if no router was reachable and no attempts are left
    /// - `RegistrationConflict` if the router refused the address
    /// - `Stopped` if the tunnel stopped first
    pub async fn connect(&self) -> Result<(), TunnelError> {
        let mut status = self.status.clone();
        loop {
            let current = status.borrow_and_update().clone();
            if let Some(error) = terminal_error(&current) {
                return Err(error);
            }
            match current {
                TunnelStatus::Registered { .. } => return Ok(()),
                TunnelStatus::Waiting { failed_passes } if failed_passes > 0 => {
                    return Err(TunnelError::Connectivity { attempts: failed_passes });
                },
                _ => {},
            }
            if status.changed().await.is_err() {
                return Err(TunnelError::Stopped);
            }
        }
    }

    /// Current status.
    pub fn status(&self) -> TunnelStatus {
        self.status.borrow().clone()
    }

    /// Send `payload` to `destination` through the router.
    ///
    /// # Errors
    ///
    /// `NotConnected` unless registered, `Io` if the write failed.
    pub async fn send(&self, destination: Destination, payload: Bytes) -> Result<(), TunnelError> {
        self.send_with(destination, payload, FrameFlags::empty()).await
    }

    /// [`send`](Self::send) with frame flags, e.g. `LOOPBACK`.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_with(
        &self,
        destination: Destination,
        payload: Bytes,
        flags: FrameFlags,
    ) -> Result<(), TunnelError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Send { destination, payload, flags, reply })
            .map_err(|_| TunnelError::Stopped)?;
        response.await.map_err(|_| TunnelError::Stopped)?
    }

    /// Unregister, close the connection and end the task.
    pub async fn stop(self) {
        let (done, stopped) = oneshot::channel();
        if self.commands.send(Command::Stop { done }).is_ok() {
            let _ = stopped.await;
        }
        let _ = self.task.await;
    }
}

/// Error for a status the tunnel never leaves on its own.
pub(crate) fn terminal_error(status: &TunnelStatus) -> Option<TunnelError> {
    match status {
        TunnelStatus::Failed { attempts } => Some(TunnelError::Exhausted { attempts: *attempts }),
        TunnelStatus::Rejected { reason } => Some(TunnelError::RegistrationConflict { reason: *reason }),
        TunnelStatus::Stopped => Some(TunnelError::Stopped),
        _ => None,
    }
}

struct Worker<T: Transport, E: Environment> {
    tunnel: Tunnel,
    transport: Arc<T>,
    env: E,
    events: mpsc::UnboundedSender<TunnelEvent>,
    status: watch::Sender<TunnelStatus>,
    internal: mpsc::UnboundedSender<Internal<T::Stream>>,
    /// Bumped whenever the current connection or attempt is abandoned
    generation: u64,
    writer: Option<WriteHalf<T::Stream>>,
    connecting: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl<T: Transport, E: Environment> Worker<T, E> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal<T::Stream>>,
    ) {
        let env = self.env.clone();
        let tick_interval = self.tunnel.config().tick_interval;
        let mut next_tick = env.now() + tick_interval;

        let actions = self.tunnel.start(env.now());
        let _ = self.execute(actions).await;

        loop {
            let until_tick = next_tick.saturating_duration_since(env.now());
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Send { destination, payload, flags, reply }) => {
                        let result = match self.tunnel.send(destination, payload, flags) {
                            Ok(actions) => self.execute(actions).await.map_err(TunnelError::Io),
                            Err(error) => Err(error),
                        };
                        let _ = reply.send(result);
                    },
                    Some(Command::Stop { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    },
                    None => {
                        self.shutdown().await;
                        break;
                    },
                },
                Some(message) = internal.recv() => self.handle_internal(message).await,
                () = env.sleep(until_tick) => {
                    let now = env.now();
                    next_tick = now + tick_interval;
                    let actions = self.tunnel.tick(now);
                    let _ = self.execute(actions).await;
                },
            }
        }
    }

    async fn handle_internal(&mut self, message: Internal<T::Stream>) {
        let now = self.env.now();
        let actions = match message {
            Internal::Connected { generation, result } if generation == self.generation => {
                self.connecting = None;
                match result {
                    Ok(stream) => {
                        let (reader, writer) = tokio::io::split(stream);
                        self.writer = Some(writer);
                        self.reader = Some(self.spawn_reader(reader));
                        self.tunnel.connect_succeeded(now)
                    },
                    Err(error) => {
                        tracing::debug!(%error, "router connect failed");
                        self.tunnel.connect_failed(now)
                    },
                }
            },
            Internal::Frame { generation, frame } if generation == self.generation => {
                self.tunnel.handle_frame(&frame, now)
            },
            Internal::ReadEnded { generation, reason } if generation == self.generation => {
                tracing::debug!(%reason, "router connection ended");
                self.drop_connection().await;
                self.tunnel.connection_lost(now)
            },
            _ => Vec::new(),
        };
        let _ = self.execute(actions).await;
    }

    /// Run actions, including those produced while running them. Returns the
    /// first write error.
    async fn execute(&mut self, actions: Vec<TunnelAction>) -> io::Result<()> {
        let mut queue: VecDeque<TunnelAction> = actions.into();
        let mut result = Ok(());

        while let Some(action) = queue.pop_front() {
            match action {
                TunnelAction::Connect { router, .. } => self.spawn_connect(router),
                TunnelAction::SendFrame(frame) => {
                    let Some(writer) = &mut self.writer else {
                        continue;
                    };
                    if let Err(error) = write_frame(writer, &frame).await {
                        tracing::debug!(%error, "router write failed");
                        self.drop_connection().await;
                        queue.extend(self.tunnel.connection_lost(self.env.now()));
                        if result.is_ok() {
                            result = Err(error);
                        }
                    }
                },
                TunnelAction::Close => self.drop_connection().await,
                TunnelAction::Deliver { sender, payload } => {
                    let _ = self.events.send(TunnelEvent::Message { sender, payload });
                },
                TunnelAction::Suspect { logical } => {
                    let _ = self.events.send(TunnelEvent::Suspect { logical });
                },
                TunnelAction::Status(status) => {
                    self.status.send_replace(status.clone());
                    let _ = self.events.send(TunnelEvent::Status(status));
                },
            }
        }
        result
    }

    fn spawn_connect(&mut self, router: String) {
        self.generation += 1;
        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let internal = self.internal.clone();
        let timeout = self.tunnel.config().connect_timeout;

        tracing::debug!(%router, "connecting to router");
        self.connecting = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.connect(&router)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
            };
            let _ = internal.send(Internal::Connected { generation, result });
        }));
    }

    fn spawn_reader(&self, mut reader: ReadHalf<T::Stream>) -> JoinHandle<()> {
        let generation = self.generation;
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let reason = loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => {
                        if internal.send(Internal::Frame { generation, frame }).is_err() {
                            return;
                        }
                    },
                    Ok(None) => break "router closed the connection".to_string(),
                    Err(error) => break format!("read failed: {error}"),
                }
            };
            let _ = internal.send(Internal::ReadEnded { generation, reason });
        })
    }

    async fn drop_connection(&mut self) {
        self.generation += 1;
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(task) = self.reader.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    async fn shutdown(&mut self) {
        let actions = self.tunnel.stop();
        let _ = self.execute(actions).await;
        self.drop_connection().await;
    }
}
