//! Frame opcodes.

/// Operation carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Client binds a logical address to its connection within a group.
    Register = 0x0001,
    /// Router accepted a registration.
    RegisterAck = 0x0002,
    /// Router refused a registration.
    RegisterReject = 0x0003,
    /// Client removes a binding.
    Unregister = 0x0004,
    /// Group message, unicast or broadcast.
    Data = 0x0010,
    /// Router reports that a member's connection is gone.
    Suspect = 0x0011,
    /// Keepalive request.
    Ping = 0x0020,
    /// Keepalive response.
    Pong = 0x0021,
}

impl Opcode {
    /// Decode a wire opcode.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Register),
            0x0002 => Some(Self::RegisterAck),
            0x0003 => Some(Self::RegisterReject),
            0x0004 => Some(Self::Unregister),
            0x0010 => Some(Self::Data),
            0x0011 => Some(Self::Suspect),
            0x0020 => Some(Self::Ping),
            0x0021 => Some(Self::Pong),
            _ => None,
        }
    }

    /// Wire value.
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Keepalive frames carry no payload.
    pub fn is_keepalive(self) -> bool {
        matches!(self, Self::Ping | Self::Pong)
    }
}
