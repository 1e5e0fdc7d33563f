//! Wire format for the relaymesh router.
//!
//! Frames consist of a fixed 16-byte header (zero-copy binary) followed by a
//! variable-length CBOR payload. The header carries the opcode, flags and the
//! payload length so the router can dispatch and bound reads before touching
//! the payload.
//!
//! The router only understands the registration and forwarding frames defined
//! here. Whatever members exchange inside a `DATA` frame is opaque at this
//! layer.
//!
//! # Security
//!
//! Header parsing uses compile-time verified layouts via `zerocopy`. Payloads
//! are capped at [`Frame::MAX_PAYLOAD_SIZE`] to bound per-connection memory.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod errors;
pub mod flags;
pub mod frame;
pub mod header;
pub mod opcodes;
pub mod payloads;

pub use address::{Address, LogicalAddr};
pub use errors::{ProtocolError, Result};
pub use flags::FrameFlags;
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcodes::Opcode;
pub use payloads::{Destination, Payload};
