//! Frame header flags.

use bitflags::bitflags;

bitflags! {
    /// Per-frame flags carried in the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u8 {
        /// Broadcast `DATA` frames are also delivered back to the sender.
        const LOOPBACK = 0b0000_0001;
    }
}
