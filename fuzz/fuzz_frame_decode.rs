//! Fuzz target for the frame decoder.
//!
//! Run with: cargo +nightly fuzz run fuzz_frame_decode
//!
//! Arbitrary bytes off the socket must decode into a message or fail with
//! a `FrameError`; a decoded request must encode back to an equal one.

#![no_main]

use brainstem_core::ipc::codec;
use brainstem_core::ipc::{Request, Response};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = codec::decode::<Request>(data) {
        let frame = codec::encode(&request).expect("decoded request must encode");
        let again: Request = codec::decode(&frame).expect("encoded request must decode");
        assert_eq!(request, again);
    }
    let _ = codec::decode::<Response>(data);
    let _ = codec::decode_payload::<Request>(data);
});
