//! relaymesh client
//!
//! Everything a member process needs to join a group through a relay router.
//!
//! # Layers
//!
//! - [`Tunnel`]: Sans-IO router session. Tries routers in order, registers,
//!   keeps the connection alive and reconnects at a fixed interval.
//! - [`TunnelClient`]: tokio task driving a [`Tunnel`] over any
//!   [`Transport`](relaymesh_core::transport::Transport).
//! - [`Channel`]: a [`TunnelClient`] plus the membership protocol. Reports
//!   installed views and application messages to a [`Receiver`].
//!
//! ```text
//!  application ◄── Receiver ── Channel ── Membership (join, merge)
//!                                 │
//!                            TunnelClient ── Tunnel
//!                                 │
//!                             Transport ──► router
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod runtime;
#[cfg(feature = "transport")]
pub mod tcp;
pub mod tunnel;

pub use channel::{Channel, Receiver};
pub use config::{ChannelConfig, TunnelConfig};
pub use error::{ChannelError, TunnelError};
pub use runtime::{TunnelClient, TunnelEvent};
#[cfg(feature = "transport")]
pub use tcp::TcpTransport;
pub use tunnel::{Tunnel, TunnelAction, TunnelStatus};
