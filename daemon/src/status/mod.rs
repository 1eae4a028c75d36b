//! Shared status snapshot published by the core
//!
//! Writers (the line state machine and control requests) hold the lock only
//! long enough to copy in a change; readers copy the whole snapshot out.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::frame::Frame;
use crate::line::LineState;

/// Highest accepted debug verbosity
pub const MAX_DEBUG_LEVEL: u8 = 5;

/// Clamp any requested verbosity into `0..=MAX_DEBUG_LEVEL`
pub fn clamp_debug_level(level: i64) -> u8 {
    level.clamp(0, i64::from(MAX_DEBUG_LEVEL)) as u8
}

/// Point-in-time view of the receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Incremented on every change
    pub version: u64,
    pub line_state: LineState,
    pub last_frame: Option<Frame>,
    pub error_flag: bool,
    pub last_error: Option<String>,
    pub debug_level: u8,
    pub frames_received: u64,
    pub checksum_failures: u64,
    pub decode_errors: u64,
}

impl Status {
    fn new(debug_level: u8) -> Self {
        Self {
            version: 0,
            line_state: LineState::Idle,
            last_frame: None,
            error_flag: false,
            last_error: None,
            debug_level,
            frames_received: 0,
            checksum_failures: 0,
            decode_errors: 0,
        }
    }

    pub fn checksum_valid(&self) -> Option<bool> {
        self.last_frame.as_ref().map(Frame::checksum_valid)
    }
}

/// Handle to the shared snapshot
#[derive(Debug, Clone)]
pub struct StatusPort {
    inner: Arc<RwLock<Status>>,
}

impl StatusPort {
    pub fn new(debug_level: i64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Status::new(clamp_debug_level(debug_level)))),
        }
    }

    /// Copy of the current snapshot
    pub fn snapshot(&self) -> Status {
        self.inner.read().clone()
    }

    fn update(&self, change: impl FnOnce(&mut Status)) {
        let mut status = self.inner.write();
        change(&mut status);
        status.version += 1;
    }

    pub fn set_line_state(&self, state: LineState) {
        self.update(|s| s.line_state = state);
    }

    /// Replace the last frame. A checksum failure raises the error flag,
    /// a valid frame clears it.
    pub fn publish_frame(&self, frame: &Frame) {
        let decode_errors = frame.decode_errors() as u64;
        let valid = frame.checksum_valid();
        self.update(|s| {
            s.frames_received += 1;
            s.decode_errors += decode_errors;
            if valid {
                s.error_flag = false;
                s.last_error = None;
            } else {
                s.checksum_failures += 1;
                s.error_flag = true;
                s.last_error = Some(format!("checksum mismatch in frame {frame}"));
            }
            s.last_frame = Some(frame.clone());
        });
    }

    pub fn raise_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| {
            s.error_flag = true;
            s.last_error = Some(message);
        });
    }

    pub fn clear_error(&self) {
        self.update(|s| {
            s.error_flag = false;
            s.last_error = None;
        });
    }

    /// Store a clamped verbosity and return the value actually stored
    pub fn set_debug_level(&self, level: i64) -> u8 {
        let clamped = clamp_debug_level(level);
        self.update(|s| s.debug_level = clamped);
        debug!(requested = level, stored = clamped, "debug level set");
        clamped
    }

    pub fn debug_level(&self) -> u8 {
        self.inner.read().debug_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_symbols;

    fn frame(text: &str) -> Frame {
        Frame::from_symbols(&parse_symbols(text).unwrap()).unwrap()
    }

    #[test]
    fn test_clamp_debug_level() {
        assert_eq!(clamp_debug_level(-7), 0);
        assert_eq!(clamp_debug_level(0), 0);
        assert_eq!(clamp_debug_level(3), 3);
        assert_eq!(clamp_debug_level(5), 5);
        assert_eq!(clamp_debug_level(6), 5);
        assert_eq!(clamp_debug_level(i64::MAX), 5);
        assert_eq!(clamp_debug_level(i64::MIN), 0);
    }

    #[test]
    fn test_set_debug_level_clamps() {
        let port = StatusPort::new(9);
        assert_eq!(port.debug_level(), 5);
        assert_eq!(port.set_debug_level(-1), 0);
        assert_eq!(port.snapshot().debug_level, 0);
        assert_eq!(port.set_debug_level(2), 2);
        assert_eq!(port.debug_level(), 2);
    }

    #[test]
    fn test_version_increments() {
        let port = StatusPort::new(1);
        let v0 = port.snapshot().version;
        port.set_line_state(LineState::AwaitingOffHook);
        port.set_line_state(LineState::HandshakeDelay);
        let status = port.snapshot();
        assert_eq!(status.version, v0 + 2);
        assert_eq!(status.line_state, LineState::HandshakeDelay);
    }

    #[test]
    fn test_publish_invalid_frame_flags_error() {
        let port = StatusPort::new(1);
        port.publish_frame(&frame("1234181131010014"));

        let status = port.snapshot();
        assert!(status.error_flag);
        assert_eq!(status.checksum_valid(), Some(false));
        assert_eq!(status.checksum_failures, 1);
        assert!(status.last_error.unwrap().contains("checksum"));
    }

    #[test]
    fn test_valid_frame_clears_error() {
        let port = StatusPort::new(1);
        port.raise_error("line read failed");
        assert!(port.snapshot().error_flag);

        port.publish_frame(&frame("1234181131010013"));
        let status = port.snapshot();
        assert!(!status.error_flag);
        assert_eq!(status.checksum_valid(), Some(true));
        assert_eq!(status.frames_received, 1);
        assert_eq!(status.last_frame.unwrap().to_string(), "1234181131010013");
    }

    #[test]
    fn test_decode_errors_accumulate() {
        let port = StatusPort::new(1);
        port.publish_frame(&frame("1234?81131010013"));
        port.publish_frame(&frame("?234?81131010013"));
        assert_eq!(port.snapshot().decode_errors, 3);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let port = StatusPort::new(1);
        let before = port.snapshot();
        port.raise_error("boom");
        assert!(!before.error_flag);
        assert!(port.snapshot().error_flag);
    }
}
