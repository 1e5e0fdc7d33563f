//! Sans-IO router.
//!
//! [`RouterDriver`] turns connection events into actions: frames to write and
//! connections to close. It owns the [`Registry`] and one keepalive
//! [`Connection`] per session. Time is passed in; nothing here performs I/O.

use std::{collections::HashMap, time::Instant};

use relaymesh_core::connection::{Connection, ConnectionAction};
use relaymesh_proto::{
    Address, Destination, Frame, FrameFlags, LogicalAddr, Payload,
    payloads::{Data, Register, RegisterAck, RegisterReject, Suspect, Unregister},
};

use crate::{
    config::RouterConfig,
    registry::{RegisterOutcome, Registry},
};

/// Input to the router.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// A client connected.
    ConnectionAccepted {
        /// Runtime-assigned session identifier
        session_id: u64,
    },

    /// A frame arrived on a session.
    FrameReceived {
        /// Source session
        session_id: u64,
        /// Decoded frame
        frame: Frame,
    },

    /// A session's stream ended or failed.
    ConnectionClosed {
        /// Closed session
        session_id: u64,
        /// Why it closed
        reason: String,
    },

    /// Periodic timer.
    Tick,
}

/// Effect requested by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterAction {
    /// Write a frame to a session.
    SendToSession {
        /// Target session
        session_id: u64,
        /// Frame to write
        frame: Frame,
    },

    /// Close a session's connection.
    CloseConnection {
        /// Session to close
        session_id: u64,
        /// Why
        reason: String,
    },
}

/// Relay router state machine.
pub struct RouterDriver {
    config: RouterConfig,
    registry: Registry,
    sessions: HashMap<u64, Connection>,
}

impl RouterDriver {
    /// Router with no sessions.
    pub fn new(config: RouterConfig) -> Self {
        let registry = Registry::new(config.max_members_per_group);
        Self { config, registry, sessions: HashMap::new() }
    }

    /// The registry, for inspection.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Process one event.
    pub fn process_event(&mut self, event: RouterEvent, now: Instant) -> Vec<RouterAction> {
        match event {
            RouterEvent::ConnectionAccepted { session_id } => {
                let mut connection = Connection::new(now, self.config.connection_config());
                // Router sessions wait for REGISTER from the moment they open.
                let _ = connection.begin_registration(now);
                self.sessions.insert(session_id, connection);
                tracing::debug!(session_id, "session opened");
                Vec::new()
            },
            RouterEvent::FrameReceived { session_id, frame } => {
                self.handle_frame(session_id, &frame, now)
            },
            RouterEvent::ConnectionClosed { session_id, reason } => {
                tracing::debug!(session_id, %reason, "session closed");
                self.sessions.remove(&session_id);
                self.drop_session(session_id)
            },
            RouterEvent::Tick => self.tick(now),
        }
    }

    fn handle_frame(&mut self, session_id: u64, frame: &Frame, now: Instant) -> Vec<RouterAction> {
        let Some(connection) = self.sessions.get_mut(&session_id) else {
            tracing::debug!(session_id, "frame for unknown session");
            return Vec::new();
        };
        connection.update_activity(now);

        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(session_id, %error, "undecodable frame, closing session");
                return self.close(session_id, format!("protocol error: {error}"));
            },
        };

        match payload {
            Payload::Register(register) => self.handle_register(session_id, register, now),
            Payload::Unregister(unregister) => self.handle_unregister(session_id, unregister),
            Payload::Data(data) => self.handle_data(session_id, data, frame.flags()),
            Payload::Ping => reply(session_id, Payload::Pong),
            Payload::Pong => Vec::new(),
            other => {
                tracing::debug!(session_id, opcode = ?other.opcode(), "ignoring router-bound frame");
                Vec::new()
            },
        }
    }

    fn handle_register(
        &mut self,
        session_id: u64,
        register: Register,
        now: Instant,
    ) -> Vec<RouterAction> {
        let Register { group, address } = register;

        match self.registry.register(&group, address.clone(), session_id) {
            Ok(outcome) => {
                if let Some(connection) = self.sessions.get_mut(&session_id) {
                    let _ = connection.registered(session_id, now);
                }
                tracing::info!(session_id, %group, %address, ?outcome, "registered");

                let mut actions = reply(session_id, Payload::RegisterAck(RegisterAck {
                    group,
                    session_id,
                }));
                if let RegisterOutcome::Replaced { previous_session } = outcome
                    && !self.registry.is_bound(previous_session)
                {
                    actions.extend(self.close(previous_session, "binding replaced".to_string()));
                }
                actions
            },
            Err(error) => {
                tracing::warn!(session_id, %error, "registration rejected");
                reply(session_id, Payload::RegisterReject(RegisterReject {
                    group,
                    address,
                    reason: error.reason(),
                }))
            },
        }
    }

    fn handle_unregister(&mut self, session_id: u64, unregister: Unregister) -> Vec<RouterAction> {
        let Unregister { group, logical } = unregister;

        let owned = self.registry.lookup(&group, &logical).is_some_and(|r| r.session_id == session_id);
        if !owned {
            tracing::debug!(session_id, %group, %logical, "unregister for binding not held");
            return Vec::new();
        }

        self.registry.unregister(&group, &logical);
        tracing::info!(session_id, %group, %logical, "unregistered");
        self.suspect(&group, &logical)
    }

    fn handle_data(&self, session_id: u64, data: Data, flags: FrameFlags) -> Vec<RouterAction> {
        let Data { group, sender, destination, payload } = data;

        let sender: Address = match self.registry.lookup(&group, &sender.logical) {
            Some(reg) if reg.session_id == session_id => reg.address.clone(),
            _ => {
                tracing::debug!(session_id, %group, claimed = %sender, "data from unregistered sender dropped");
                return Vec::new();
            },
        };

        let targets: Vec<u64> = match &destination {
            Destination::All => self
                .registry
                .members(&group)
                .filter(|r| flags.contains(FrameFlags::LOOPBACK) || r.address.logical != sender.logical)
                .map(|r| r.session_id)
                .collect(),
            Destination::Member(logical) => match self.registry.lookup(&group, logical) {
                Some(reg) => vec![reg.session_id],
                None => {
                    tracing::debug!(%group, destination = %logical, "no such member, dropping");
                    return Vec::new();
                },
            },
        };

        let forwarded = Payload::Data(Data { group, sender, destination, payload });
        let frame = match forwarded.into_frame_with(flags) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(session_id, %error, "failed to re-encode data frame");
                return Vec::new();
            },
        };

        targets
            .into_iter()
            .map(|target| RouterAction::SendToSession { session_id: target, frame: frame.clone() })
            .collect()
    }

    fn tick(&mut self, now: Instant) -> Vec<RouterAction> {
        let mut expired = Vec::new();
        for (session_id, connection) in &mut self.sessions {
            for action in connection.tick(now) {
                if let ConnectionAction::Close { reason } = action {
                    expired.push((*session_id, reason));
                }
            }
        }

        let mut actions = Vec::new();
        for (session_id, reason) in expired {
            tracing::info!(session_id, %reason, "session timed out");
            actions.extend(self.close(session_id, reason));
        }
        actions
    }

    /// Close a session and release its bindings.
    fn close(&mut self, session_id: u64, reason: String) -> Vec<RouterAction> {
        self.sessions.remove(&session_id);
        let mut actions = vec![RouterAction::CloseConnection { session_id, reason }];
        actions.extend(self.drop_session(session_id));
        actions
    }

    fn drop_session(&mut self, session_id: u64) -> Vec<RouterAction> {
        let removed = self.registry.remove_session(session_id);
        let mut actions = Vec::new();
        for (group, registration) in removed {
            tracing::info!(session_id, %group, address = %registration.address, "binding lost");
            actions.extend(self.suspect(&group, &registration.address.logical));
        }
        actions
    }

    /// Tell the remaining members of `group` that `logical` is gone.
    fn suspect(&self, group: &str, logical: &LogicalAddr) -> Vec<RouterAction> {
        let payload = Payload::Suspect(Suspect { group: group.to_string(), logical: logical.clone() });
        let frame = match payload.into_frame() {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(%group, %error, "failed to encode suspect");
                return Vec::new();
            },
        };

        self.registry
            .members(group)
            .map(|r| RouterAction::SendToSession { session_id: r.session_id, frame: frame.clone() })
            .collect()
    }
}

fn reply(session_id: u64, payload: Payload) -> Vec<RouterAction> {
    match payload.into_frame() {
        Ok(frame) => vec![RouterAction::SendToSession { session_id, frame }],
        Err(error) => {
            tracing::warn!(session_id, %error, "failed to encode reply");
            Vec::new()
        },
    }
}
