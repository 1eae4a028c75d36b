//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::LineEvent;
use crate::frame::{ContactIdMessage, Frame};
use crate::line::LineState;
use crate::status::Status;

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from the operator console to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current receiver status
    GetStatus,

    /// Set debug verbosity; clamped to 0-5
    SetDebugLevel { level: i64 },

    /// Abort the current cycle and return the line to Idle
    Reset,

    /// Publish a diagnostic report, given as 16 keypad characters
    InjectTestFrame { symbols: String },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to line event notifications
    Subscribe,
}

/// Responses from daemon to operator console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current receiver status
    Status(StatusReport),

    /// Debug level actually stored
    DebugLevel { level: u8 },

    /// The frame published by an injection
    Frame(FrameReport),

    /// Command accepted
    Ack,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to subscribed clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Line event occurred
    Event { event: LineEvent },
}

/// A published frame as seen by the console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameReport {
    pub symbols: String,
    pub checksum_valid: bool,
    pub decode_errors: usize,
    pub message: ContactIdMessage,
}

impl From<&Frame> for FrameReport {
    fn from(frame: &Frame) -> Self {
        Self {
            symbols: frame.to_string(),
            checksum_valid: frame.checksum_valid(),
            decode_errors: frame.decode_errors(),
            message: frame.message(),
        }
    }
}

/// Full receiver status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Daemon version
    pub version: String,

    /// Snapshot version, bumped on every status change
    pub revision: u64,

    /// Uptime in seconds
    pub uptime_secs: u64,

    pub line_state: LineState,
    pub last_frame: Option<FrameReport>,
    pub checksum_valid: Option<bool>,
    pub error_flag: bool,
    pub last_error: Option<String>,
    pub debug_level: u8,
    pub frames_received: u64,
    pub checksum_failures: u64,
    pub decode_errors: u64,
}

impl StatusReport {
    pub fn new(status: &Status, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            revision: status.version,
            uptime_secs,
            line_state: status.line_state,
            last_frame: status.last_frame.as_ref().map(FrameReport::from),
            checksum_valid: status.checksum_valid(),
            error_flag: status.error_flag,
            last_error: status.last_error.clone(),
            debug_level: status.debug_level,
            frames_received: status.frames_received,
            checksum_failures: status.checksum_failures,
            decode_errors: status.decode_errors,
        }
    }
}

/// Serialize `msg` with its length prefix
pub fn encode<T: Serialize>(msg: &T) -> serde_json::Result<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    let mut bytes = Vec::with_capacity(4 + body.len());
    bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_symbols;
    use crate::status::StatusPort;

    #[test]
    fn test_request_serialization() {
        let req = Request::SetDebugLevel { level: 3 };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("set_debug_level"));
        assert!(json.contains('3'));
    }

    #[test]
    fn test_request_deserialization() {
        let json = r#"{"type":"inject_test_frame","symbols":"1234181131010013"}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        assert_eq!(
            req,
            Request::InjectTestFrame {
                symbols: "1234181131010013".to_string()
            }
        );

        let req: Request = serde_json::from_str(r#"{"type":"set_debug_level","level":-9}"#).unwrap();
        assert_eq!(req, Request::SetDebugLevel { level: -9 });
    }

    #[test]
    fn test_unknown_request_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"type":"set_mode"}"#).is_err());
    }

    #[test]
    fn test_status_response_serialization() {
        let port = StatusPort::new(2);
        let frame = Frame::from_symbols(&parse_symbols("1234181131010014").unwrap()).unwrap();
        port.publish_frame(&frame);

        let resp = Response::Status(StatusReport::new(&port.snapshot(), 12));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""line_state":"idle""#));
        assert!(json.contains(r#""checksum_valid":false"#));
        assert!(json.contains(r#""account":"1234""#));

        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn test_encode_length_prefix() {
        let bytes = encode(&Response::Pong).unwrap();
        let len = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
        assert_eq!(len, bytes.len() - 4);
        assert_eq!(&bytes[4..], br#"{"type":"pong"}"#);
    }

    #[test]
    fn test_notification_serialization() {
        let note = Notification::Event {
            event: LineEvent::Reset { discarded: 3 },
        };
        let json = serde_json::to_string(&note).unwrap();
        assert!(json.contains(r#""type":"event""#));
        assert!(json.contains(r#""discarded":3"#));
    }
}
