//! Protocol error types.

use thiserror::Error;

/// Errors raised while parsing or building frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Not enough bytes for a header or the declared payload.
    #[error("frame too short: need {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Header does not start with the protocol magic.
    #[error("invalid magic: {0:02x?}")]
    InvalidMagic([u8; 4]),

    /// Header version is not supported by this build.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Payload exceeds [`crate::Frame::MAX_PAYLOAD_SIZE`].
    #[error("payload of {size} bytes exceeds limit of {max}")]
    PayloadTooLarge {
        /// Declared or actual payload size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Opcode is not defined.
    #[error("unknown opcode 0x{0:04x}")]
    UnknownOpcode(u16),

    /// CBOR serialization failed.
    #[error("CBOR encode failed: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed.
    #[error("CBOR decode failed: {0}")]
    CborDecode(String),
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
