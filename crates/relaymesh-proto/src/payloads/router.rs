//! Registration and forwarding payloads.
//!
//! # Protocol Flow
//!
//! 1. Client connects and sends `Register { group, address }`
//! 2. Router answers `RegisterAck` or `RegisterReject`
//! 3. Client sends `Data` addressed to one member or to the whole group; the
//!    router forwards it with the sender address it has on record
//! 4. When a member's connection drops or it unregisters, the router sends
//!    `Suspect` to the remaining members of each group it was in

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::address::{Address, LogicalAddr};

/// Bind `address` to the sending connection within `group`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    /// Group name
    pub group: String,
    /// Address being registered
    pub address: Address,
}

/// Registration accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAck {
    /// Group name
    pub group: String,
    /// Router-assigned session identifier of the connection
    pub session_id: u64,
}

/// Why a registration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RejectReason {
    /// Another live connection already holds this logical address.
    DuplicateAddress = 1,
    /// The group is at its member limit.
    GroupFull = 2,
}

/// Registration refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterReject {
    /// Group name
    pub group: String,
    /// Address that was refused
    pub address: Address,
    /// Reason for the refusal
    pub reason: RejectReason,
}

/// Remove a binding. Removing an absent binding is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unregister {
    /// Group name
    pub group: String,
    /// Logical address to unbind
    pub logical: LogicalAddr,
}

/// Target of a [`Data`] frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// Every registered member of the group.
    All,
    /// The member registered under this logical address.
    Member(LogicalAddr),
}

/// Group message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    /// Group name
    pub group: String,
    /// Sender address. The router overwrites this with the registered one.
    pub sender: Address,
    /// Recipient(s)
    pub destination: Destination,
    /// Opaque message body
    pub payload: Bytes,
}

/// A member's connection to the router is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspect {
    /// Group name
    pub group: String,
    /// Member that is gone
    pub logical: LogicalAddr,
}
