//! Fixed-size frame header.
//!
//! ```text
//!  0       4   5   6       8               12              16
//!  +-------+---+---+-------+---------------+---------------+
//!  | magic |ver|flg|opcode | payload_size  |   reserved    |
//!  +-------+---+---+-------+---------------+---------------+
//! ```
//!
//! Multi-byte fields are big-endian.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{BigEndian, U16, U32},
};

use crate::{
    errors::{ProtocolError, Result},
    flags::FrameFlags,
    frame::Frame,
    opcodes::Opcode,
};

/// Frame header, laid out exactly as on the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct FrameHeader {
    magic: [u8; 4],
    version: u8,
    flags: u8,
    opcode: U16<BigEndian>,
    payload_size: U32<BigEndian>,
    reserved: [u8; 4],
}

impl FrameHeader {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 16;

    /// Protocol magic, ASCII "RLMH".
    pub const MAGIC: [u8; 4] = *b"RLMH";

    /// Current protocol version.
    pub const VERSION: u8 = 1;

    /// Create a header for `opcode` with no flags and an empty payload.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            flags: 0,
            opcode: U16::new(opcode.to_u16()),
            payload_size: U32::new(0),
            reserved: [0; 4],
        }
    }

    /// Parse and validate a header from the start of `bytes`.
    ///
    /// Validates magic, version and the declared payload size. Unknown
    /// opcodes are accepted here and rejected when the payload is decoded, so
    /// a reader can still skip the frame body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (header, _) = Self::read_from_prefix(bytes).map_err(|_| {
            ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() }
        })?;

        if header.magic != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic(header.magic));
        }
        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let size = header.payload_size() as usize;
        if size > Frame::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size, max: Frame::MAX_PAYLOAD_SIZE });
        }

        Ok(header)
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Raw opcode value.
    pub fn opcode(&self) -> u16 {
        self.opcode.get()
    }

    /// Opcode, if known.
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Header flags. Unknown bits are dropped.
    pub fn flags(&self) -> FrameFlags {
        FrameFlags::from_bits_truncate(self.flags)
    }

    /// Replace the header flags.
    pub fn set_flags(&mut self, flags: FrameFlags) {
        self.flags = flags.bits();
    }

    /// Declared payload length.
    pub fn payload_size(&self) -> u32 {
        self.payload_size.get()
    }

    pub(crate) fn set_payload_size(&mut self, size: u32) {
        self.payload_size = U32::new(size);
    }
}
