//! Capability interface between the core and the GPIO hardware

use serde::Deserialize;

/// Kernel GPIO line number
pub type Pin = u32;

/// Callback invoked by a backend when a watched line rises.
///
/// Handlers run on the backend's own context and must return quickly.
pub type EdgeHandler = Box<dyn Fn() + Send + Sync + 'static>;

/// Errors reported by a hardware backend
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("failed to read pin {pin}: {reason}")]
    Read { pin: Pin, reason: String },

    #[error("unable to set up edge handler on pin {pin}: {reason}")]
    EdgeRegistration { pin: Pin, reason: String },

    #[error("failed to drive tone on pin {pin}: {reason}")]
    Pwm { pin: Pin, reason: String },

    #[error("gpio setup failed for pin {pin}: {reason}")]
    Setup { pin: Pin, reason: String },
}

/// GPIO capabilities the receiver core depends on
pub trait HardwareIo: Send + Sync + 'static {
    /// Read the current level of an input line. Must return within microseconds.
    fn read_digital(&self, pin: Pin) -> Result<bool, HardwareError>;

    /// Register a handler for rising edges on `pin`.
    ///
    /// The backend never invokes the handler re-entrantly for the same line.
    fn on_rising_edge(&self, pin: Pin, handler: EdgeHandler) -> Result<(), HardwareError>;

    /// Drive a software-PWM square wave on `pin`.
    ///
    /// `on_value` and `period_range` are in 100 µs pulse units.
    /// An `on_value` of 0 stops output.
    fn set_pwm_tone(&self, pin: Pin, on_value: u32, period_range: u32)
        -> Result<(), HardwareError>;

    /// Stop any backend threads. Called once at daemon shutdown.
    fn shutdown(&self) {}
}

/// Wiring of the DTMF decoder chip and line interface.
///
/// Defaults are the BCM line numbers of the Raspberry Pi receiver board
/// (header pins 26/19/21/23 for Q1-Q4, 24 for the latch, 7 for line sense
/// and 12 for the tone output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PinMap {
    pub q1: Pin,
    pub q2: Pin,
    pub q3: Pin,
    pub q4: Pin,
    /// Decoder "data valid" strobe; rises when Q1-Q4 hold a new digit
    pub latch: Pin,
    /// High while the panel holds the line off-hook
    pub line: Pin,
    pub tone: Pin,
}

impl PinMap {
    /// Data lines ordered from least to most significant bit
    pub fn data_lines(&self) -> [Pin; 4] {
        [self.q1, self.q2, self.q3, self.q4]
    }
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            q1: 7,
            q2: 10,
            q3: 9,
            q4: 11,
            latch: 8,
            line: 4,
            tone: 18,
        }
    }
}
