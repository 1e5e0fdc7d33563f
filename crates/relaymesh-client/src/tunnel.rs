//! Sans-IO tunnel.
//!
//! The tunnel keeps one member registered at a router. It walks the router
//! list in order, registers, keeps the connection alive and starts over after
//! `reconnect_interval` when a pass fails or the connection drops.
//!
//! ```text
//!            start
//!   Idle ───────────► Connecting ──ok──► Registering ──ack──► Registered
//!                        ▲   │ fail            │ reject/timeout    │ lost
//!                        │   ▼                 ▼                   │
//!                        └─ Waiting ◄──── next router / pass ◄─────┘
//!                               │ attempts exhausted
//!                               ▼
//!                             Failed
//! ```
//!
//! Every method takes `now` and returns [`TunnelAction`]s for the runtime.

use std::time::Instant;

use bytes::Bytes;
use relaymesh_core::connection::{Connection, ConnectionAction};
use relaymesh_proto::{
    Address, Destination, Frame, FrameFlags, LogicalAddr, Payload,
    payloads::{Data, Register, RejectReason, Unregister},
};

use crate::{config::TunnelConfig, error::TunnelError};

/// Tunnel state as seen by the owning process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelStatus {
    /// Not started
    Idle,
    /// Connecting to a router
    Connecting {
        /// Router being tried
        router: String,
    },
    /// Registered at a router
    Registered {
        /// Router in use
        router: String,
        /// Router-assigned session
        session_id: u64,
    },
    /// Waiting to start another pass over the router list
    Waiting {
        /// Consecutive failed passes
        failed_passes: u32,
    },
    /// Gave up after exhausting the configured attempts
    Failed {
        /// Failed passes
        attempts: u32,
    },
    /// The router refused the registration
    Rejected {
        /// Router's reason
        reason: RejectReason,
    },
    /// Stopped by the owner
    Stopped,
}

/// Effects requested by the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelAction {
    /// Open a connection to `router`. Report the outcome with
    /// [`Tunnel::connect_succeeded`] or [`Tunnel::connect_failed`].
    Connect {
        /// Position in the router list
        index: usize,
        /// Router address
        router: String,
    },
    /// Write a frame on the current connection.
    SendFrame(Frame),
    /// Drop the current connection.
    Close,
    /// A group message for the local member.
    Deliver {
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
    /// Status changed.
    Status(TunnelStatus),
}

#[derive(Debug)]
enum Phase {
    Idle,
    Connecting { index: usize },
    Registering { index: usize, connection: Connection },
    Registered { index: usize, connection: Connection, session_id: u64 },
    Waiting { until: Instant },
    Failed,
    Rejected(RejectReason),
    Stopped,
}

/// Tunnel state machine.
#[derive(Debug)]
pub struct Tunnel {
    config: TunnelConfig,
    phase: Phase,
    failed_passes: u32,
}

impl Tunnel {
    /// Idle tunnel.
    pub fn new(config: TunnelConfig) -> Self {
        Self { config, phase: Phase::Idle, failed_passes: 0 }
    }

    /// Tunnel settings.
    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Current status.
    pub fn status(&self) -> TunnelStatus {
        match &self.phase {
            Phase::Idle => TunnelStatus::Idle,
            Phase::Connecting { index } | Phase::Registering { index, .. } => {
                TunnelStatus::Connecting { router: self.router(*index) }
            },
            Phase::Registered { index, session_id, .. } => {
                TunnelStatus::Registered { router: self.router(*index), session_id: *session_id }
            },
            Phase::Waiting { .. } => TunnelStatus::Waiting { failed_passes: self.failed_passes },
            Phase::Failed => TunnelStatus::Failed { attempts: self.failed_passes },
            Phase::Rejected(reason) => TunnelStatus::Rejected { reason: *reason },
            Phase::Stopped => TunnelStatus::Stopped,
        }
    }

    /// True while registered at a router.
    pub fn is_registered(&self) -> bool {
        matches!(self.phase, Phase::Registered { .. })
    }

    /// Begin the first pass over the router list.
    pub fn start(&mut self, now: Instant) -> Vec<TunnelAction> {
        if !matches!(self.phase, Phase::Idle) {
            return Vec::new();
        }
        self.begin_pass(now)
    }

    /// The connection requested by the last `Connect` is up.
    pub fn connect_succeeded(&mut self, now: Instant) -> Vec<TunnelAction> {
        let Phase::Connecting { index } = self.phase else {
            return vec![TunnelAction::Close];
        };

        let mut connection = Connection::new(now, self.config.connection_config());
        let _ = connection.begin_registration(now);
        self.phase = Phase::Registering { index, connection };

        let register = Payload::Register(Register {
            group: self.config.group.clone(),
            address: self.config.address.clone(),
        });
        match register.into_frame() {
            Ok(frame) => vec![TunnelAction::SendFrame(frame)],
            Err(error) => {
                tracing::warn!(%error, "failed to encode registration");
                let mut actions = vec![TunnelAction::Close];
                actions.extend(self.next_router(index, now));
                actions
            },
        }
    }

    /// The connection requested by the last `Connect` could not be opened.
    pub fn connect_failed(&mut self, now: Instant) -> Vec<TunnelAction> {
        let Phase::Connecting { index } = self.phase else {
            return Vec::new();
        };
        tracing::debug!(router = %self.router(index), "connect failed");
        self.next_router(index, now)
    }

    /// Process a frame from the router.
    pub fn handle_frame(&mut self, frame: &Frame, now: Instant) -> Vec<TunnelAction> {
        match &mut self.phase {
            Phase::Registering { connection, .. } | Phase::Registered { connection, .. } => {
                connection.update_activity(now);
            },
            _ => return Vec::new(),
        }

        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "undecodable frame from router");
                return Vec::new();
            },
        };

        match payload {
            Payload::RegisterAck(ack) => self.on_registered(ack.session_id, now),
            Payload::RegisterReject(reject) => {
                tracing::warn!(group = %self.config.group, reason = ?reject.reason, "registration rejected");
                self.phase = Phase::Rejected(reject.reason);
                vec![TunnelAction::Close, TunnelAction::Status(self.status())]
            },
            Payload::Data(data) if self.is_registered() => {
                vec![TunnelAction::Deliver { sender: data.sender, payload: data.payload }]
            },
            Payload::Suspect(suspect) if self.is_registered() => {
                vec![TunnelAction::Suspect { logical: suspect.logical }]
            },
            Payload::Ping => match Payload::Pong.into_frame() {
                Ok(frame) => vec![TunnelAction::SendFrame(frame)],
                Err(_) => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// The current connection failed or the router closed it.
    pub fn connection_lost(&mut self, now: Instant) -> Vec<TunnelAction> {
        match self.phase {
            Phase::Registering { index, .. } => self.next_router(index, now),
            Phase::Registered { index, .. } => {
                tracing::info!(router = %self.router(index), "router connection lost");
                self.wait(now)
            },
            _ => Vec::new(),
        }
    }

    /// Send `payload` to `destination` in the group.
    ///
    /// # Errors
    ///
    /// `NotConnected` unless registered.
    pub fn send(
        &self,
        destination: Destination,
        payload: Bytes,
        flags: FrameFlags,
    ) -> Result<Vec<TunnelAction>, TunnelError> {
        if !self.is_registered() {
            return Err(TunnelError::NotConnected);
        }
        let data = Payload::Data(Data {
            group: self.config.group.clone(),
            sender: self.config.address.clone(),
            destination,
            payload,
        });
        Ok(vec![TunnelAction::SendFrame(data.into_frame_with(flags)?)])
    }

    /// Drive timers: reconnect pauses, registration deadline, keepalive.
    pub fn tick(&mut self, now: Instant) -> Vec<TunnelAction> {
        match &mut self.phase {
            Phase::Waiting { until } if now >= *until => self.begin_pass(now),
            Phase::Registering { connection, .. } | Phase::Registered { connection, .. } => {
                let mut actions = Vec::new();
                for action in connection.tick(now) {
                    match action {
                        ConnectionAction::SendPing => {
                            if let Ok(frame) = Payload::Ping.into_frame() {
                                actions.push(TunnelAction::SendFrame(frame));
                            }
                        },
                        ConnectionAction::Close { reason } => {
                            tracing::info!(%reason, "dropping router connection");
                            actions.push(TunnelAction::Close);
                            actions.extend(self.connection_lost(now));
                            return actions;
                        },
                    }
                }
                actions
            },
            _ => Vec::new(),
        }
    }

    /// Leave the router. Unregisters first when registered.
    pub fn stop(&mut self) -> Vec<TunnelAction> {
        let mut actions = Vec::new();
        match self.phase {
            Phase::Registered { .. } => {
                let unregister = Payload::Unregister(Unregister {
                    group: self.config.group.clone(),
                    logical: self.config.address.logical.clone(),
                });
                if let Ok(frame) = unregister.into_frame() {
                    actions.push(TunnelAction::SendFrame(frame));
                }
                actions.push(TunnelAction::Close);
            },
            Phase::Connecting { .. } | Phase::Registering { .. } => actions.push(TunnelAction::Close),
            Phase::Stopped => return actions,
            _ => {},
        }
        self.phase = Phase::Stopped;
        actions.push(TunnelAction::Status(TunnelStatus::Stopped));
        actions
    }

    fn on_registered(&mut self, session_id: u64, now: Instant) -> Vec<TunnelAction> {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        let (index, mut connection) = match phase {
            Phase::Registering { index, connection } | Phase::Registered { index, connection, .. } => {
                (index, connection)
            },
            other => {
                self.phase = other;
                return Vec::new();
            },
        };

        let _ = connection.registered(session_id, now);
        tracing::info!(
            router = %self.router(index),
            group = %self.config.group,
            address = %self.config.address,
            session_id,
            "registered"
        );
        self.failed_passes = 0;
        self.phase = Phase::Registered { index, connection, session_id };
        vec![TunnelAction::Status(self.status())]
    }

    fn begin_pass(&mut self, now: Instant) -> Vec<TunnelAction> {
        if self.config.routers.is_empty() {
            return self.pass_failed(now);
        }
        self.connect_to(0)
    }

    fn connect_to(&mut self, index: usize) -> Vec<TunnelAction> {
        self.phase = Phase::Connecting { index };
        let router = self.router(index);
        vec![
            TunnelAction::Status(TunnelStatus::Connecting { router: router.clone() }),
            TunnelAction::Connect { index, router },
        ]
    }

    fn next_router(&mut self, index: usize, now: Instant) -> Vec<TunnelAction> {
        if index + 1 < self.config.routers.len() {
            self.connect_to(index + 1)
        } else {
            self.pass_failed(now)
        }
    }

    fn pass_failed(&mut self, now: Instant) -> Vec<TunnelAction> {
        self.failed_passes += 1;
        if self.config.max_reconnect_attempts.is_some_and(|max| self.failed_passes >= max) {
            tracing::warn!(attempts = self.failed_passes, "no router reachable, giving up");
            self.phase = Phase::Failed;
            return vec![TunnelAction::Status(self.status())];
        }
        tracing::debug!(failed_passes = self.failed_passes, "no router reachable, will retry");
        self.wait(now)
    }

    fn wait(&mut self, now: Instant) -> Vec<TunnelAction> {
        self.phase = Phase::Waiting { until: now + self.config.reconnect_interval };
        vec![TunnelAction::Status(self.status())]
    }

    fn router(&self, index: usize) -> String {
        self.config.routers.get(index).cloned().unwrap_or_default()
    }
}
