//! Contact-ID frame assembly and validation

mod assembler;
mod contact_id;

pub use assembler::{parse_symbols, Frame, FrameAssembler, FrameError, FRAME_LEN};
pub use contact_id::{checksum_digit, ContactIdMessage};
