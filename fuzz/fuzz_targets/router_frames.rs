#![no_main]

use std::time::{Duration, Instant};

use libfuzzer_sys::fuzz_target;
use relaymesh_proto::Frame;
use relaymesh_router::{RouterConfig, RouterDriver, RouterEvent};

fuzz_target!(|chunks: Vec<(u8, Vec<u8>)>| {
    // Arbitrary frames from a handful of sessions must never panic the
    // driver, and every session it closes must stay closed.
    let mut router = RouterDriver::new(RouterConfig::default());
    let start = Instant::now();

    for session_id in 0..4 {
        router.process_event(RouterEvent::ConnectionAccepted { session_id }, start);
    }

    for (step, (session, bytes)) in chunks.into_iter().enumerate() {
        let now = start + Duration::from_millis(step as u64 * 50);
        let session_id = u64::from(session % 4);
        if let Ok(frame) = Frame::decode(&bytes) {
            router.process_event(RouterEvent::FrameReceived { session_id, frame }, now);
        }
        router.process_event(RouterEvent::Tick, now);
    }
    assert!(router.session_count() <= 4);
});
