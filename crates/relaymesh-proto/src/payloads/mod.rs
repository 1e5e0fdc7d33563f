//! Typed frame payloads.
//!
//! Each opcode maps to one [`Payload`] variant. Payload bodies are CBOR;
//! keepalives have an empty body.

pub mod router;

use serde::{Serialize, de::DeserializeOwned};

pub use router::{
    Data, Destination, Register, RegisterAck, RegisterReject, RejectReason, Suspect, Unregister,
};

use crate::{
    errors::{ProtocolError, Result},
    flags::FrameFlags,
    frame::Frame,
    header::FrameHeader,
    opcodes::Opcode,
};

/// Decoded frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Bind an address within a group.
    Register(Register),
    /// Registration accepted.
    RegisterAck(RegisterAck),
    /// Registration refused.
    RegisterReject(RegisterReject),
    /// Remove a binding.
    Unregister(Unregister),
    /// Group message.
    Data(Data),
    /// Member connection lost.
    Suspect(Suspect),
    /// Keepalive request.
    Ping,
    /// Keepalive response.
    Pong,
}

impl Payload {
    /// Opcode this payload is carried under.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Register(_) => Opcode::Register,
            Self::RegisterAck(_) => Opcode::RegisterAck,
            Self::RegisterReject(_) => Opcode::RegisterReject,
            Self::Unregister(_) => Opcode::Unregister,
            Self::Data(_) => Opcode::Data,
            Self::Suspect(_) => Opcode::Suspect,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
        }
    }

    /// Encode into a frame with no flags.
    pub fn into_frame(self) -> Result<Frame> {
        self.into_frame_with(FrameFlags::empty())
    }

    /// Encode into a frame carrying `flags`.
    pub fn into_frame_with(self, flags: FrameFlags) -> Result<Frame> {
        let mut header = FrameHeader::new(self.opcode());
        header.set_flags(flags);

        let body = match &self {
            Self::Register(p) => encode_cbor(p)?,
            Self::RegisterAck(p) => encode_cbor(p)?,
            Self::RegisterReject(p) => encode_cbor(p)?,
            Self::Unregister(p) => encode_cbor(p)?,
            Self::Data(p) => encode_cbor(p)?,
            Self::Suspect(p) => encode_cbor(p)?,
            Self::Ping | Self::Pong => Vec::new(),
        };

        if body.len() > Frame::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: body.len(),
                max: Frame::MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Frame::new(header, body))
    }

    /// Decode the payload of `frame` according to its opcode.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or_else(|| ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        let body = frame.payload.as_ref();

        Ok(match opcode {
            Opcode::Register => Self::Register(decode_cbor(body)?),
            Opcode::RegisterAck => Self::RegisterAck(decode_cbor(body)?),
            Opcode::RegisterReject => Self::RegisterReject(decode_cbor(body)?),
            Opcode::Unregister => Self::Unregister(decode_cbor(body)?),
            Opcode::Data => Self::Data(decode_cbor(body)?),
            Opcode::Suspect => Self::Suspect(decode_cbor(body)?),
            Opcode::Ping => Self::Ping,
            Opcode::Pong => Self::Pong,
        })
    }
}

/// Serialize a value to CBOR.
pub fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR.
pub fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}
