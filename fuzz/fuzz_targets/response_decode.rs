//! Fuzz target for response frame decoding.
//!
//! Tests:
//! - Any four bytes decode or fail without panicking
//! - Accepted frames re-encode to the same bytes
//! - Decoded values fit in 24 bits and sign-extend into range

#![no_main]

use libfuzzer_sys::fuzz_target;
use ht7017::protocol::frame::{decode_response, encode_response, sign_extend_24, RAW_MAX};

fuzz_target!(|input: (u8, [u8; 4])| {
    let (register, frame) = input;
    let register = register & 0x7F;

    if let Ok(raw) = decode_response(register, &frame) {
        assert!(raw <= RAW_MAX);
        assert_eq!(encode_response(register, raw), frame);

        let signed = sign_extend_24(raw);
        assert!((-(1 << 23)..(1 << 23)).contains(&signed));
    }
});
