//! Complete frames: header plus payload bytes.

use bytes::{BufMut, Bytes};

use crate::{
    errors::{ProtocolError, Result},
    flags::FrameFlags,
    header::FrameHeader,
    opcodes::Opcode,
};

/// A header and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header. `payload_size` always matches `payload.len()`.
    pub header: FrameHeader,
    /// CBOR-encoded payload (empty for keepalives).
    pub payload: Bytes,
}

impl Frame {
    /// Largest payload accepted on the wire (1 MiB).
    pub const MAX_PAYLOAD_SIZE: usize = 1 << 20;

    /// Create a frame, fixing up the header's payload size.
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        header.set_payload_size(payload.len() as u32);
        Self { header, payload }
    }

    /// Opcode, if known.
    pub fn opcode(&self) -> Option<Opcode> {
        self.header.opcode_enum()
    }

    /// Header flags.
    pub fn flags(&self) -> FrameFlags {
        self.header.flags()
    }

    /// Bytes needed to encode this frame.
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Append the encoded frame to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Decode one frame from the start of `bytes`.
    ///
    /// Trailing bytes after the declared payload are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;
        let end = FrameHeader::SIZE + header.payload_size() as usize;
        if bytes.len() < end {
            return Err(ProtocolError::FrameTooShort { expected: end, actual: bytes.len() });
        }

        let payload = Bytes::copy_from_slice(&bytes[FrameHeader::SIZE..end]);
        Ok(Self { header, payload })
    }
}
