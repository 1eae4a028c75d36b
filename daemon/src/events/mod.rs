//! Events module for line state machine activity
//!
//! Events are broadcast to the daemon's log loop and to control clients
//! that subscribed for notifications.

use serde::{Deserialize, Serialize};

use crate::line::LineState;

/// Where a published frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSource {
    /// Sampled from the panel during an off-hook cycle
    Line,
    /// Injected through the control channel for diagnostics
    Injected,
}

/// Events emitted by the line state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineEvent {
    /// Line state changed
    StateChanged {
        from: LineState,
        to: LineState,
        /// Time spent in `from`, in milliseconds
        dwell_ms: u64,
    },

    /// A complete 16-symbol report was published
    FrameReceived {
        symbols: String,
        checksum_valid: bool,
        source: FrameSource,
    },

    /// A sampled symbol could not be decoded
    DecodeError {
        /// Zero-based position in the frame
        position: usize,
    },

    /// Hardware access failed while the line was in use
    HardwareFault { message: String },

    /// An external reset returned the line to Idle
    Reset {
        /// Symbols dropped from an unfinished frame
        discarded: usize,
    },
}

impl std::fmt::Display for LineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineEvent::StateChanged { from, to, dwell_ms } => {
                write!(f, "STATE {} -> {} ({}ms)", from, to, dwell_ms)
            }
            LineEvent::FrameReceived {
                symbols,
                checksum_valid,
                ..
            } => {
                let check = if *checksum_valid { "ok" } else { "BAD" };
                write!(f, "FRAME {} checksum {}", symbols, check)
            }
            LineEvent::DecodeError { position } => write!(f, "DECODE_ERROR at {}", position),
            LineEvent::HardwareFault { message } => write!(f, "HARDWARE_FAULT {}", message),
            LineEvent::Reset { discarded } => write!(f, "RESET ({} symbols discarded)", discarded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = LineEvent::StateChanged {
            from: LineState::AwaitingOffHook,
            to: LineState::HandshakeDelay,
            dwell_ms: 1000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("state_changed"));
        assert!(json.contains("awaiting_off_hook"));
        assert!(json.contains("1000"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"frame_received","symbols":"1234181131010013","checksum_valid":true,"source":"injected"}"#;
        let event: LineEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(
            event,
            LineEvent::FrameReceived {
                checksum_valid: true,
                source: FrameSource::Injected,
                ..
            }
        ));
    }

    #[test]
    fn test_event_display() {
        let event = LineEvent::FrameReceived {
            symbols: "1234181131010014".to_string(),
            checksum_valid: false,
            source: FrameSource::Line,
        };
        assert_eq!(event.to_string(), "FRAME 1234181131010014 checksum BAD");
    }
}
