//! Frame decoding robustness tests.
//!
//! Arbitrary input must either decode or fail with a typed error, never
//! panic, and encoding a decoded frame must reproduce the consumed bytes.

use proptest::prelude::*;
use relaymesh_proto::{Frame, FrameHeader, Opcode, Payload};

proptest! {
    #[test]
    fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        if let Ok(frame) = Frame::decode(&bytes) {
            let _ = Payload::from_frame(&frame);
        }
    }

    #[test]
    fn decoded_frame_reencodes_to_consumed_prefix(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        trailing in proptest::collection::vec(any::<u8>(), 0..16),
    ) {
        let frame = Frame::new(FrameHeader::new(Opcode::Data), payload);
        let mut wire = Vec::new();
        frame.encode(&mut wire).unwrap();
        let consumed = wire.len();
        wire.extend_from_slice(&trailing);

        let decoded = Frame::decode(&wire).unwrap();
        let mut again = Vec::new();
        decoded.encode(&mut again).unwrap();
        prop_assert_eq!(&again[..], &wire[..consumed]);
    }
}
