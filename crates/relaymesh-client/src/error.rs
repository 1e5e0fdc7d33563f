//! Client error types.

use std::io;

use relaymesh_proto::{ProtocolError, payloads::RejectReason};
use thiserror::Error;

/// Tunnel errors.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// No router connection is registered right now.
    #[error("not connected to a router")]
    NotConnected,

    /// No router could be reached.
    #[error("no router reachable after {attempts} attempt(s)")]
    Connectivity {
        /// Failed passes over the router list
        attempts: u32,
    },

    /// Every allowed pass over the router list failed and the tunnel gave up.
    #[error("gave up after {attempts} failed pass(es) over the router list")]
    Exhausted {
        /// Failed passes
        attempts: u32,
    },

    /// The router refused the registration.
    #[error("registration refused: {reason:?}")]
    RegistrationConflict {
        /// Router's reason
        reason: RejectReason,
    },

    /// The tunnel was stopped.
    #[error("tunnel stopped")]
    Stopped,

    /// Frame encoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Writing to the router failed.
    #[error("router connection failed: {0}")]
    Io(#[from] io::Error),
}

/// Channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Tunnel failure.
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// Envelope encoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The channel was closed.
    #[error("channel closed")]
    Closed,
}
