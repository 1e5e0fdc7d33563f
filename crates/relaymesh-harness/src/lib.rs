//! Deterministic simulation harness for relaymesh.
//!
//! turmoil-backed implementations of the [`Environment`], [`Transport`] and
//! [`Listener`] traits, so the production router and client runtimes run
//! unchanged on a simulated network with virtual time.
//!
//! [`Environment`]: relaymesh_core::Environment
//! [`Transport`]: relaymesh_core::transport::Transport
//! [`Listener`]: relaymesh_core::transport::Listener

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod recorder;
pub mod scenario;
pub mod sim_env;
pub mod sim_transport;

pub use recorder::Recorder;
pub use scenario::{ROUTER_PORT, member_config, run_router, wait_for_view};
pub use sim_env::SimEnv;
pub use sim_transport::{SimListener, SimTransport};
