//! Current-symbol exchange between the edge handler and the timing task

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::hardware::{HardwareError, HardwareIo, PinMap};

use super::symbol::{decode, Symbol};

/// Single-writer/single-reader cell holding the most recently decoded symbol.
///
/// Written only from the latch edge handler and read only by the sampling
/// step of the line state machine. Never blocks.
#[derive(Debug)]
pub struct SymbolLatch {
    slot: AtomicU8,
}

impl SymbolLatch {
    /// A fresh latch reads [`Symbol::Error`] until the first edge
    pub const fn new() -> Self {
        Self {
            slot: AtomicU8::new(Symbol::Error as u8),
        }
    }

    pub fn store(&self, symbol: Symbol) {
        self.slot.store(symbol as u8, Ordering::Release);
    }

    pub fn current(&self) -> Symbol {
        decode(self.slot.load(Ordering::Acquire))
    }
}

impl Default for SymbolLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Read Q1-Q4 and compose the 4-bit register (Q1 is bit 0)
pub fn read_register<H: HardwareIo + ?Sized>(hw: &H, pins: &PinMap) -> Result<u8, HardwareError> {
    let mut register = 0u8;
    for (bit, pin) in pins.data_lines().into_iter().enumerate() {
        if hw.read_digital(pin)? {
            register |= 1 << bit;
        }
    }
    Ok(register)
}

/// Register the latch-strobe handler that decodes into `latch`.
///
/// A failed data-line read latches [`Symbol::Error`].
pub fn install_edge_handler(
    hw: Arc<dyn HardwareIo>,
    pins: PinMap,
    latch: Arc<SymbolLatch>,
) -> Result<(), HardwareError> {
    let reader = Arc::clone(&hw);
    hw.on_rising_edge(
        pins.latch,
        Box::new(move || {
            let symbol = match read_register(reader.as_ref(), &pins) {
                Ok(register) => decode(register),
                Err(_) => Symbol::Error,
            };
            latch.store(symbol);
            trace!(%symbol, "latched symbol");
        }),
    )
}
