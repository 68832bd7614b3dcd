//! Wire types shared by the daemon and its clients.
//!
//! Every message is a JSON object tagged by `"type"` (snake_case) and
//! carried in one length-prefixed frame (see [`codec`](super::codec)).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The system-wide interaction mode. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Nothing active; the daemon starts here.
    #[default]
    Idle,
    /// Low-latency transcription.
    Dictation,
    /// Language-model response generation.
    Intelligent,
    /// Multi-step task execution.
    Agent,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Idle, Mode::Dictation, Mode::Intelligent, Mode::Agent];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Dictation => "dictation",
            Mode::Intelligent => "intelligent",
            Mode::Agent => "agent",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known [`Mode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode {0:?} (expected idle, dictation, intelligent or agent)")]
pub struct ParseModeError(pub String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseModeError(s.to_string()))
    }
}

/// Client → daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    GetStatus,
    SetMode { mode: Mode },
    Ping,
}

/// Daemon → client, either a reply or an unsolicited mode broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Status(StatusSnapshot),
    ModeChange { mode: Mode, active: bool },
    Pong,
    Error { code: String, message: String },
}

/// Error code for bodies that do not parse into a [`Request`].
pub const ERROR_BAD_REQUEST: &str = "bad_request";

/// Error code sent before closing a connection whose frame exceeds the cap.
pub const ERROR_FRAME_TOO_LARGE: &str = "frame_too_large";

impl Response {
    /// The notification every client sees when the mode becomes `mode`.
    pub fn mode_change(mode: Mode) -> Self {
        Response::ModeChange { mode, active: true }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Short name of the variant, matching the wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Status(_) => "status",
            Response::ModeChange { .. } => "mode_change",
            Response::Pong => "pong",
            Response::Error { .. } => "error",
        }
    }
}

/// Point-in-time view of the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub version: String,
    pub mode: Mode,
    pub hotkey_registered: bool,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_wire_shapes() {
        assert_eq!(
            serde_json::to_value(Request::GetStatus).unwrap(),
            json!({"type": "get_status"})
        );
        assert_eq!(
            serde_json::to_value(Request::SetMode {
                mode: Mode::Intelligent
            })
            .unwrap(),
            json!({"type": "set_mode", "mode": "intelligent"})
        );
        assert_eq!(
            serde_json::to_value(Request::Ping).unwrap(),
            json!({"type": "ping"})
        );
    }

    #[test]
    fn test_response_wire_shapes() {
        let status = Response::Status(StatusSnapshot {
            version: "0.1.0".to_string(),
            mode: Mode::Agent,
            hotkey_registered: true,
            uptime_secs: 12,
        });
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({
                "type": "status",
                "version": "0.1.0",
                "mode": "agent",
                "hotkey_registered": true,
                "uptime_secs": 12
            })
        );
        assert_eq!(
            serde_json::to_value(Response::mode_change(Mode::Dictation)).unwrap(),
            json!({"type": "mode_change", "mode": "dictation", "active": true})
        );
        assert_eq!(
            serde_json::to_value(Response::Pong).unwrap(),
            json!({"type": "pong"})
        );
        assert_eq!(
            serde_json::to_value(Response::error(ERROR_BAD_REQUEST, "nope")).unwrap(),
            json!({"type": "error", "code": "bad_request", "message": "nope"})
        );
    }

    #[test]
    fn test_unknown_request_type_rejected() {
        let result: Result<Request, _> = serde_json::from_str(r#"{"type":"reboot"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let result: Result<Request, _> =
            serde_json::from_str(r#"{"type":"set_mode","mode":"sleep"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_mode_from_str() {
        for mode in Mode::ALL {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
        assert_eq!(" Agent ".parse::<Mode>().unwrap(), Mode::Agent);
        assert!("hover".parse::<Mode>().is_err());
    }

    #[test]
    fn test_default_mode_is_idle() {
        assert_eq!(Mode::default(), Mode::Idle);
    }
}
