//! Error types for session and membership state machines.

use relaymesh_proto::LogicalAddr;
use thiserror::Error;

use crate::{
    connection::ConnectionState,
    membership::{MembershipState, MergeId},
    view::ViewId,
};

/// Session state machine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Operation is not valid in the current state.
    #[error("invalid state {state:?} for {operation}")]
    InvalidState {
        /// Current state
        state: ConnectionState,
        /// Attempted operation
        operation: String,
    },
}

/// Membership protocol conditions.
///
/// None of these are fatal. The runtime logs them; the protocol heals through
/// the discovery cadence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    /// A partition did not answer a merge round in time and was left out.
    #[error("merge {merge_id} timed out waiting for {missing:?}")]
    MergeTimeout {
        /// Round identifier
        merge_id: MergeId,
        /// Partition representatives that did not answer
        missing: Vec<LogicalAddr>,
    },

    /// An install carried a view id that is not newer than the current one.
    #[error("stale view {incoming} ignored, current is {current}")]
    StaleViewIgnored {
        /// Installed view id
        current: ViewId,
        /// Rejected view id
        incoming: ViewId,
    },

    /// An install carried a view that does not include this member.
    #[error("view {view_id} does not include {local}")]
    NotMember {
        /// Rejected view id
        view_id: ViewId,
        /// Local member
        local: LogicalAddr,
    },

    /// A view whose coordinator is not its first member or that lists a member twice.
    #[error("malformed view {0}")]
    MalformedView(ViewId),

    /// Message does not apply to the current state.
    #[error("unexpected {message} in state {state:?}")]
    UnexpectedMessage {
        /// Current state
        state: MembershipState,
        /// Message kind
        message: &'static str,
    },
}
