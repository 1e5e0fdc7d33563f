//! Session keepalive state machine.
//!
//! Tracks one router connection from either end: the router keeps one per
//! accepted connection, the tunnel client keeps one for its current router.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods accept time as a parameter (no stored Environment)
//! - [`Connection::tick`] returns [`ConnectionAction`]s
//! - Driver code executes actions (send a ping, close the connection)
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ Register ┌─────────┐   Ack    ┌────────────┐
//! │ Init │─────────>│ Pending │─────────>│ Registered │
//! └──────┘          └─────────┘          └────────────┘
//!                        │                     │
//!                        │ Timeout/Error       │ Idle timeout/Close
//!                        ↓                     ↓
//!                   ┌────────┐            ┌────────┐
//!                   │ Closed │<───────────│ Closed │
//!                   └────────┘            └────────┘
//! ```
//!
//! # Timeouts
//!
//! - **Registration timeout**: registration must complete within this window
//! - **Idle timeout**: no frame at all for this long closes the session
//! - **Heartbeat interval**: when set, a ping is due this often once
//!   registered (clients set it, the router answers pings instead)

use std::time::{Duration, Instant};

use crate::error::ConnectionError;

/// Actions returned by the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Send a keepalive ping to the peer
    SendPing,

    /// Close the connection with this reason
    Close {
        /// Reason for closing the connection
        reason: String,
    },
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected, registration not started
    Init,
    /// Registration in flight
    Pending,
    /// At least one registration accepted
    Registered,
    /// Connection closed
    Closed,
}

/// Session timing configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Time allowed between connect and a completed registration
    pub register_timeout: Duration,
    /// Idle timeout before disconnecting
    pub idle_timeout: Duration,
    /// Heartbeat interval (should be < idle_timeout / 2), `None` to never ping
    pub heartbeat_interval: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            register_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(15),
            heartbeat_interval: Some(Duration::from_secs(3)),
        }
    }
}

/// Session state machine
///
/// Pure state machine: no I/O, time passed to every method that needs it.
#[derive(Debug, Clone)]
pub struct Connection {
    state: ConnectionState,
    config: ConnectionConfig,
    /// Last time anything was heard from the peer (or the state changed)
    last_activity: Instant,
    last_heartbeat: Option<Instant>,
    /// Router-assigned session identifier
    session_id: Option<u64>,
}

impl Connection {
    /// Create a new session in Init state
    pub fn new(now: Instant, config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Init,
            config,
            last_activity: now,
            last_heartbeat: None,
            session_id: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Session ID (once registered)
    #[must_use]
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Registration sent (client) or awaited (router).
    ///
    /// # Errors
    /// Returns `InvalidState` unless in Init state
    pub fn begin_registration(&mut self, now: Instant) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Init {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "begin_registration".to_string(),
            });
        }

        self.state = ConnectionState::Pending;
        self.last_activity = now;
        Ok(())
    }

    /// Registration accepted.
    ///
    /// A registered session may register again (another group, or the same
    /// address re-bound); the session id is refreshed.
    ///
    /// # Errors
    /// Returns `InvalidState` from Init or Closed
    pub fn registered(&mut self, session_id: u64, now: Instant) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Pending | ConnectionState::Registered => {
                self.state = ConnectionState::Registered;
                self.session_id = Some(session_id);
                self.last_activity = now;
                Ok(())
            },
            state => Err(ConnectionError::InvalidState {
                state,
                operation: "registered".to_string(),
            }),
        }
    }

    /// Transition to Closed state
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Record that a frame arrived from the peer.
    pub fn update_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Check if the session has timed out
    ///
    /// Returns `Some(elapsed)` if timed out, `None` otherwise
    #[must_use]
    pub fn check_timeout(&self, now: Instant) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.last_activity);

        let timeout = match self.state {
            ConnectionState::Init | ConnectionState::Pending => self.config.register_timeout,
            ConnectionState::Registered => self.config.idle_timeout,
            ConnectionState::Closed => return None,
        };

        if elapsed > timeout { Some(elapsed) } else { None }
    }

    /// Tick the state machine - check for timeouts and heartbeats
    ///
    /// Call periodically (every 100ms or so).
    pub fn tick(&mut self, now: Instant) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if let Some(elapsed) = self.check_timeout(now) {
            let reason = match self.state {
                ConnectionState::Registered => format!("idle timeout after {elapsed:?}"),
                _ => format!("registration timeout after {elapsed:?}"),
            };

            self.close();
            actions.push(ConnectionAction::Close { reason });
            return actions;
        }

        if self.state == ConnectionState::Registered
            && let Some(interval) = self.config.heartbeat_interval
        {
            let due = match self.last_heartbeat {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= interval,
            };

            if due {
                actions.push(ConnectionAction::SendPing);
                self.last_heartbeat = Some(now);
            }
        }

        actions
    }
}
