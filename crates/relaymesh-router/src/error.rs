//! Router error types.

use std::io;

use relaymesh_proto::{LogicalAddr, payloads::RejectReason};
use thiserror::Error;

/// Registration refused by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The logical address is bound by another live process.
    #[error("{logical} is already registered in group {group}")]
    DuplicateAddress {
        /// Group name
        group: String,
        /// Contested logical address
        logical: LogicalAddr,
    },

    /// The group holds as many bindings as it may.
    #[error("group {group} is full ({max} members)")]
    GroupFull {
        /// Group name
        group: String,
        /// Configured limit
        max: usize,
    },
}

impl RegistryError {
    /// Wire reason carried in `REGISTER_REJECT`.
    pub fn reason(&self) -> RejectReason {
        match self {
            Self::DuplicateAddress { .. } => RejectReason::DuplicateAddress,
            Self::GroupFull { .. } => RejectReason::GroupFull,
        }
    }
}

/// Router runtime errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listening socket.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Requested address
        address: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Accepting a connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The router actor stopped unexpectedly.
    #[error("router actor stopped")]
    ActorStopped,
}
