//! relaymesh relay router
//!
//! Lets processes that cannot reach each other directly exchange messages
//! through a central relay, as if they shared a broadcast medium.
//!
//! # Architecture
//!
//! ```text
//!   connection task ─┐                       ┌─► connection task (writer)
//!   connection task ─┼─ RouterEvent ─► actor ┼─► connection task (writer)
//!   connection task ─┘   (mpsc)      (driver)└─► ...
//! ```
//!
//! [`RouterDriver`] is a Sans-IO state machine owning the [`Registry`]. The
//! tokio runtime in [`server`] runs it on a single actor task, which makes
//! every register, unregister and forward linearizable without locks.
//! Connection tasks only decode frames, forward them as events and write
//! whatever the actor queues for them.

pub mod config;
pub mod driver;
pub mod error;
pub mod registry;
pub mod server;

pub use config::RouterConfig;
pub use driver::{RouterAction, RouterDriver, RouterEvent};
pub use error::{RegistryError, ServerError};
pub use registry::{RegisterOutcome, Registration, Registry};
pub use server::{Router, TcpAcceptor};
