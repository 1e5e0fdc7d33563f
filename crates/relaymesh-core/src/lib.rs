//! relaymesh core logic
//!
//! Pure state machine logic for relay-based group membership, decoupled from
//! I/O so it can run unchanged under production runtimes, deterministic unit
//! tests and network simulation.
//!
//! # Architecture
//!
//! Protocol logic is implemented as deterministic state machines isolated from
//! I/O, time, randomness and scheduling. Time is passed in explicitly and
//! randomness is seeded by the caller.
//!
//! State transitions produce declarative actions describing intended effects
//! (send this message, install this view) rather than executing them. The
//! router and client runtimes interpret those actions.
//!
//! # Components
//!
//! - [`connection`]: Session keepalive state machine (registration deadline,
//!   heartbeat, idle timeout)
//! - [`membership`]: Join, discovery and merge protocol around a [`View`]
//! - [`view`]: Views and view identifiers
//! - [`mod@env`]: Environment abstraction (time, RNG)
//! - [`transport`]: Stream transport abstraction and frame I/O
//! - [`error`]: Error types

pub mod connection;
pub mod env;
pub mod error;
pub mod membership;
pub mod transport;
pub mod view;

pub use env::{Environment, SystemEnv};
pub use error::{ConnectionError, MembershipError};
pub use membership::{
    Envelope, GmsMessage, Membership, MembershipAction, MembershipConfig, MembershipState,
};
pub use relaymesh_proto::{Address, LogicalAddr};
pub use view::{View, ViewId};
