#![no_main]

use libfuzzer_sys::fuzz_target;
use relaymesh_core::Envelope;
use relaymesh_proto::{Frame, FrameHeader, Opcode, Payload};

fuzz_target!(|input: (u8, &[u8])| {
    let (opcode, body) = input;
    let opcodes = [
        Opcode::Register,
        Opcode::RegisterAck,
        Opcode::RegisterReject,
        Opcode::Unregister,
        Opcode::Data,
        Opcode::Suspect,
        Opcode::Ping,
        Opcode::Pong,
    ];
    let opcode = opcodes[opcode as usize % opcodes.len()];

    let frame = Frame::new(FrameHeader::new(opcode), body.to_vec());
    let _ = Payload::from_frame(&frame);
    let _ = Envelope::decode(body);
});
