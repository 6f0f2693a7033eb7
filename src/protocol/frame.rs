//! HT7017 UART frame codec
//!
//! Wire format (4800 baud, 8E1):
//! - Read request: `0x6A, <register>` (bit 7 of the register byte clear)
//! - Read response: `<D2>, <D1>, <D0>, <checksum>`
//!
//! The device does not echo the header or the register in its response, but
//! both are folded into the checksum:
//!
//! ```text
//! checksum = !(0x6A + register + D2 + D1 + D0)   (8-bit wrapping sum)
//! ```
//!
//! Every function here is pure. Decoding needs the register the driver
//! actually requested, because a response cannot be validated on its own.

use crate::error::FrameError;

/// First byte of every frame sent to the device.
pub const FRAME_HEAD: u8 = 0x6A;

/// Length of a read request.
pub const REQUEST_LEN: usize = 2;

/// Length of a read response.
pub const RESPONSE_LEN: usize = 4;

/// Mask applied to register addresses. Bit 7 selects write when set.
pub const ADDRESS_MASK: u8 = 0x7F;

/// Register the vendor firmware unlocks writes through.
pub const WRITE_ENABLE_REGISTER: u8 = 0x52;

/// Key written to [`WRITE_ENABLE_REGISTER`] to unlock writes.
pub const WRITE_ENABLE_KEY: u8 = 0x32;

/// Length of a write-enable frame.
pub const WRITE_ENABLE_LEN: usize = 6;

/// Largest raw value a 24-bit register can hold.
pub const RAW_MAX: u32 = 0x00FF_FFFF;

const SIGN_BIT: u32 = 1 << 23;

/// Encode a register read request.
pub fn encode_request(register: u8) -> [u8; REQUEST_LEN] {
    [FRAME_HEAD, register & ADDRESS_MASK]
}

/// Compute the checksum the device appends to a read response.
pub fn checksum(register: u8, data: [u8; 3]) -> u8 {
    let sum = data
        .iter()
        .fold(FRAME_HEAD.wrapping_add(register & ADDRESS_MASK), |acc, &b| {
            acc.wrapping_add(b)
        });
    !sum
}

/// Build the response a device would send for `raw` on `register`.
///
/// Only the low 24 bits of `raw` are transmitted.
pub fn encode_response(register: u8, raw: u32) -> [u8; RESPONSE_LEN] {
    let [_, d2, d1, d0] = (raw & RAW_MAX).to_be_bytes();
    [d2, d1, d0, checksum(register, [d2, d1, d0])]
}

/// Validate a read response and extract its raw 24-bit value.
///
/// # Errors
/// Returns [`FrameError::ChecksumMismatch`] when the trailing byte does not
/// match the checksum computed for `register`.
pub fn decode_response(register: u8, frame: &[u8; RESPONSE_LEN]) -> Result<u32, FrameError> {
    let [d2, d1, d0, actual] = *frame;
    let expected = checksum(register, [d2, d1, d0]);
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }
    Ok(u32::from_be_bytes([0, d2, d1, d0]))
}

/// Sign-extend a 24-bit two's-complement value.
pub fn sign_extend_24(raw: u32) -> i32 {
    let raw = raw & RAW_MAX;
    if raw & SIGN_BIT != 0 {
        (raw | 0xFF00_0000) as i32
    } else {
        raw as i32
    }
}

/// Encode the write-enable unlock sequence.
///
/// The trailing byte is the plain 8-bit sum of header, register and key, as
/// sent by the vendor firmware; it is not complemented like read checksums.
pub fn encode_write_enable(register: u8, key: u8) -> [u8; WRITE_ENABLE_LEN] {
    let sum = FRAME_HEAD.wrapping_add(register).wrapping_add(key);
    [FRAME_HEAD, register, 0x00, 0x00, key, sum]
}
