//! Group membership messages.
//!
//! These travel as the opaque body of router `DATA` frames, wrapped in an
//! [`Envelope`] that separates membership traffic from application data.

use std::fmt;

use bytes::Bytes;
use relaymesh_proto::{
    Address, ProtocolError,
    payloads::{decode_cbor, encode_cbor},
};
use serde::{Deserialize, Serialize};

use crate::view::{View, ViewId};

/// Identifies one merge round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeId(pub u64);

impl fmt::Display for MergeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// What one partition brings into a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeContribution {
    /// The respondent's current view id
    pub view_id: ViewId,
    /// Members contributed: the whole view for a coordinator, only itself for
    /// any other member
    pub members: Vec<Address>,
}

/// Membership protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GmsMessage {
    /// Joining member looking for a coordinator (broadcast).
    JoinProbe {
        /// Joining member
        sender: Address,
    },

    /// Coordinator answering a probe.
    ProbeReply {
        /// Replying coordinator
        sender: Address,
        /// Its current view
        view_id: ViewId,
    },

    /// Ask a coordinator to be added to its view.
    JoinRequest {
        /// Joining member
        joiner: Address,
    },

    /// Periodic presence announcement (broadcast).
    Announce {
        /// Announcing member
        sender: Address,
        /// Its current view
        view_id: ViewId,
    },

    /// Ask a coordinator to merge with a foreign partition.
    MergeTrigger {
        /// Member that noticed the partition
        sender: Address,
        /// Member to send the merge request to
        partition: Address,
        /// That member's view
        view_id: ViewId,
    },

    /// Acting coordinator asks a partition for its membership.
    MergeRequest {
        /// Round identifier
        merge_id: MergeId,
        /// Acting coordinator
        acting: Address,
    },

    /// Answer to a merge request. `None` declines the round.
    MergeResponse {
        /// Round identifier
        merge_id: MergeId,
        /// Responding member
        sender: Address,
        /// Membership brought into the merge
        contribution: Option<MergeContribution>,
    },

    /// Replace the recipient's view if this one is newer.
    InstallView {
        /// New view
        view: View,
    },
}

impl GmsMessage {
    /// Short name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinProbe { .. } => "JoinProbe",
            Self::ProbeReply { .. } => "ProbeReply",
            Self::JoinRequest { .. } => "JoinRequest",
            Self::Announce { .. } => "Announce",
            Self::MergeTrigger { .. } => "MergeTrigger",
            Self::MergeRequest { .. } => "MergeRequest",
            Self::MergeResponse { .. } => "MergeResponse",
            Self::InstallView { .. } => "InstallView",
        }
    }
}

/// Body of a `DATA` frame exchanged between members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// Membership protocol traffic
    Gms(GmsMessage),
    /// Application payload
    App(Bytes),
}

impl Envelope {
    /// Encode as CBOR.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        encode_cbor(self).map(Bytes::from)
    }

    /// Decode from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_cbor(bytes)
    }
}
