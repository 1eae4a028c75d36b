//! Line states and protocol timing

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// The five states of a receive cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineState {
    /// Dial tone present, waiting for the panel to go off-hook
    #[default]
    Idle,
    /// Panel is off-hook and dialing
    AwaitingOffHook,
    /// Panel is sending its handshake tones
    HandshakeDelay,
    /// Sampling the 16 report digits
    ReceivingDigits,
    /// Kiss-off tone is being sent
    Acknowledging,
}

impl std::fmt::Display for LineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineState::Idle => write!(f, "Idle"),
            LineState::AwaitingOffHook => write!(f, "AwaitingOffHook"),
            LineState::HandshakeDelay => write!(f, "HandshakeDelay"),
            LineState::ReceivingDigits => write!(f, "ReceivingDigits"),
            LineState::Acknowledging => write!(f, "Acknowledging"),
        }
    }
}

/// Fixed protocol windows, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LineTimings {
    /// Line-level polling period while Idle
    pub poll_interval_ms: u64,
    /// Dialing time after the panel goes off-hook
    pub off_hook_settle_ms: u64,
    /// 100 ms 1400 Hz + 100 ms silence + 100 ms 2300 Hz + 250 ms gap
    pub handshake_ms: u64,
    /// Spacing between consecutive samples of the latched digit
    pub digit_period_ms: u64,
    pub kiss_off_ms: u64,
}

impl Default for LineTimings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            off_hook_settle_ms: 1000,
            handshake_ms: 550,
            digit_period_ms: 50,
            kiss_off_ms: 800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimingError {
    #[error("timing window {0} must be greater than zero")]
    ZeroWindow(&'static str),
}

impl LineTimings {
    fn windows(&self) -> [(&'static str, u64); 5] {
        [
            ("poll_interval_ms", self.poll_interval_ms),
            ("off_hook_settle_ms", self.off_hook_settle_ms),
            ("handshake_ms", self.handshake_ms),
            ("digit_period_ms", self.digit_period_ms),
            ("kiss_off_ms", self.kiss_off_ms),
        ]
    }

    /// Reject zero-length windows. Protocol windows shorter than the
    /// Contact-ID defaults are accepted with a warning.
    pub fn validate(&self) -> Result<(), TimingError> {
        let defaults = Self::default().windows();
        for ((name, value), (_, default)) in self.windows().into_iter().zip(defaults) {
            if value == 0 {
                return Err(TimingError::ZeroWindow(name));
            }
            if name != "poll_interval_ms" && value < default {
                warn!(window = name, value, default, "timing window shorter than protocol default");
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn off_hook_settle(&self) -> Duration {
        Duration::from_millis(self.off_hook_settle_ms)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn digit_period(&self) -> Duration {
        Duration::from_millis(self.digit_period_ms)
    }

    pub fn kiss_off(&self) -> Duration {
        Duration::from_millis(self.kiss_off_ms)
    }
}
