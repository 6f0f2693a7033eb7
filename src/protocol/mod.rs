//! HT7017 wire protocol: frame codec and register map.

pub mod frame;
pub mod registers;

pub use frame::{decode_response, encode_request, encode_response, sign_extend_24, FRAME_HEAD};
pub use registers::{Conversion, Quantity, RegisterDescriptor, RegisterTable};
