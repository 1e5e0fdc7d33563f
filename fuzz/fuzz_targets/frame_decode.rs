#![no_main]

use libfuzzer_sys::fuzz_target;
use relaymesh_proto::Frame;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic; a decoded frame must
    // re-encode to the bytes it was read from.
    if let Ok(frame) = Frame::decode(data) {
        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[..frame.encoded_len()]);
    }
});
