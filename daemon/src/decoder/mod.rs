//! DTMF symbol decoding
//!
//! The decoder chip presents each received digit as a 4-bit register on
//! four data lines and raises a latch strobe. The edge handler installed
//! here reads the register, decodes it and stores the result in a
//! [`SymbolLatch`] that the line state machine samples.

mod latch;
mod symbol;

pub use latch::{install_edge_handler, SymbolLatch};
pub use symbol::{decode, Symbol};
