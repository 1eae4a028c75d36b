//! Hardware access layer
//!
//! The core only talks to GPIO through the [`HardwareIo`] capability.
//! Two backends are provided: a Linux sysfs backend for the real
//! receiver board and an in-memory simulation used for bench runs and tests.

mod io;
mod sim;
mod sysfs;

pub use io::{EdgeHandler, HardwareError, HardwareIo, Pin, PinMap};
pub use sim::SimulatedHardware;
pub use sysfs::{SysfsGpio, SysfsOptions};
