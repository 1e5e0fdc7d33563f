//! Member channel: a tunnel plus the membership protocol.
//!
//! A [`Channel`] is what an application process holds. It registers at a
//! router, runs join and merge over the router, and reports installed views
//! and application messages to a [`Receiver`].

use std::{
    ops::ControlFlow,
    time::{Duration, Instant},
};

use bytes::Bytes;
use relaymesh_core::{
    Envelope, Environment, GmsMessage, Membership, MembershipAction, View, transport::Transport,
};
use relaymesh_proto::{Address, Destination};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    config::ChannelConfig,
    error::{ChannelError, TunnelError},
    runtime::{TunnelClient, TunnelEvent, terminal_error},
};

/// Application callbacks.
///
/// Called from the channel task, one at a time.
pub trait Receiver: Send + 'static {
    /// A new view was installed.
    fn on_view_change(&mut self, view: &View);

    /// An application message arrived.
    fn on_message(&mut self, _sender: &Address, _payload: &Bytes) {}

    /// The tunnel gave up for good. The channel leaves the group and stops
    /// after this call.
    fn on_error(&mut self, _error: &TunnelError) {}
}

enum Command {
    Send {
        destination: Destination,
        payload: Bytes,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Group member handle.
pub struct Channel {
    address: Address,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<Option<View>>,
    task: JoinHandle<()>,
}

impl Channel {
    /// Register at a router and start the membership protocol.
    ///
    /// An unreachable router is not an error: the tunnel keeps retrying in
    /// the background and the member starts out alone.
    ///
    /// # Errors
    ///
    /// - `Tunnel(Exhausted)` if no router was reachable and no reconnect
    ///   attempts are left
    /// - `Tunnel(RegistrationConflict)` if the router refused the address
    pub async fn connect<T, E, R>(
        config: ChannelConfig,
        transport: T,
        env: E,
        receiver: R,
    ) -> Result<Self, ChannelError>
    where
        T: Transport,
        E: Environment,
        R: Receiver,
    {
        let address = config.tunnel.address.clone();
        let group = config.tunnel.group.clone();
        let (tunnel, events) = TunnelClient::spawn(config.tunnel, transport, env.clone());

        match tunnel.connect().await {
            Ok(()) => {},
            Err(error @ TunnelError::Connectivity { .. }) => {
                tracing::warn!(%group, %address, %error, "router unreachable, retrying in background");
            },
            Err(error) => {
                tunnel.stop().await;
                return Err(error.into());
            },
        }

        let membership = Membership::new(address.clone(), config.membership, env.clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(None);

        let member = Member { membership, tunnel, env, receiver, view: view_tx };
        let task = tokio::spawn(member.run(commands_rx, events, config.tick_interval));

        Ok(Self { address, commands: commands_tx, view: view_rx, task })
    }

    /// Local address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Latest installed view, if any.
    pub fn view(&self) -> Option<View> {
        self.view.borrow().clone()
    }

    /// Watch installed views.
    pub fn subscribe(&self) -> watch::Receiver<Option<View>> {
        self.view.clone()
    }

    /// Send an application message to one member or the whole group.
    ///
    /// # Errors
    ///
    /// `Tunnel(NotConnected)` while no router connection is registered.
    pub async fn send(&self, destination: Destination, payload: Bytes) -> Result<(), ChannelError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Send { destination, payload, reply })
            .map_err(|_| ChannelError::Closed)?;
        response.await.map_err(|_| ChannelError::Closed)?
    }

    /// Leave the group and stop.
    pub async fn close(self) {
        let (done, closed) = oneshot::channel();
        if self.commands.send(Command::Close { done }).is_ok() {
            let _ = closed.await;
        }
        let _ = self.task.await;
    }
}

struct Member<E: Environment, R: Receiver> {
    membership: Membership<E>,
    tunnel: TunnelClient,
    env: E,
    receiver: R,
    view: watch::Sender<Option<View>>,
}

impl<E: Environment, R: Receiver> Member<E, R> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TunnelEvent>,
        tick_interval: Duration,
    ) {
        let env = self.env.clone();
        let mut next_tick = env.now() + tick_interval;

        let actions = self.membership.start(env.now());
        self.execute(actions).await;

        loop {
            let until_tick = next_tick.saturating_duration_since(env.now());
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Send { destination, payload, reply }) => {
                        let _ = reply.send(send_app(&self.tunnel, destination, payload).await);
                    },
                    Some(Command::Close { done }) => {
                        self.leave().await;
                        let _ = done.send(());
                        return;
                    },
                    None => {
                        self.leave().await;
                        return;
                    },
                },
                event = events.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event).await.is_break() {
                            self.leave().await;
                            return;
                        }
                    },
                    None => {
                        tracing::warn!(local = %self.membership.local(), "tunnel task ended");
                        self.membership.stop();
                        return;
                    },
                },
                () = env.sleep(until_tick) => {
                    let now = env.now();
                    next_tick = now + tick_interval;
                    let actions = self.membership.tick(now);
                    self.execute(actions).await;
                },
            }
        }
    }

    async fn handle_event(&mut self, event: TunnelEvent) -> ControlFlow<()> {
        let now: Instant = self.env.now();
        match event {
            TunnelEvent::Message { sender, payload } => match Envelope::decode(&payload) {
                Ok(Envelope::Gms(message)) => match self.membership.handle_message(message, now) {
                    Ok(actions) => self.execute(actions).await,
                    Err(error) => {
                        tracing::debug!(local = %self.membership.local(), %sender, %error, "membership message ignored");
                    },
                },
                Ok(Envelope::App(body)) => self.receiver.on_message(&sender, &body),
                Err(error) => {
                    tracing::warn!(%sender, %error, "undecodable group message");
                },
            },
            TunnelEvent::Suspect { logical } => {
                let actions = self.membership.handle_suspect(&logical, now);
                self.execute(actions).await;
            },
            TunnelEvent::Status(status) => {
                tracing::debug!(local = %self.membership.local(), ?status, "tunnel status");
                if let Some(error) = terminal_error(&status) {
                    tracing::warn!(local = %self.membership.local(), %error, "tunnel failed, leaving group");
                    self.receiver.on_error(&error);
                    return ControlFlow::Break(());
                }
            },
        }
        ControlFlow::Continue(())
    }

    async fn execute(&mut self, actions: Vec<MembershipAction>) {
        for action in actions {
            match action {
                MembershipAction::Send { to, message } => {
                    send_gms(&self.tunnel, Destination::Member(to), message).await;
                },
                MembershipAction::Broadcast(message) => {
                    send_gms(&self.tunnel, Destination::All, message).await;
                },
                MembershipAction::ViewInstalled(view) => {
                    tracing::info!(
                        local = %self.membership.local(),
                        view_id = %view.id(),
                        size = view.size(),
                        "view installed"
                    );
                    self.receiver.on_view_change(&view);
                    self.view.send_replace(Some(view));
                },
            }
        }
    }

    async fn leave(self) {
        let Self { mut membership, tunnel, .. } = self;
        membership.stop();
        tunnel.stop().await;
        tracing::info!(local = %membership.local(), "channel closed");
    }
}

async fn send_gms(tunnel: &TunnelClient, destination: Destination, message: GmsMessage) {
    let kind = message.kind();
    let payload = match Envelope::Gms(message).encode() {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(%error, kind, "failed to encode membership message");
            return;
        },
    };
    if let Err(error) = tunnel.send(destination, payload).await {
        tracing::debug!(%error, kind, "membership message not sent");
    }
}

async fn send_app(
    tunnel: &TunnelClient,
    destination: Destination,
    payload: Bytes,
) -> Result<(), ChannelError> {
    let payload = Envelope::App(payload).encode()?;
    tunnel.send(destination, payload).await?;
    Ok(())
}
