//! Control channel for the operator console
//!
//! Status queries, debug level changes, resets, test frame injection and
//! pushed line events over a Unix domain socket.

mod protocol;
mod server;

pub use server::{ControlContext, Server};
