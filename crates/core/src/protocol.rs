//! Typed control-channel protocol between the hub and desktop runtimes.
//!
//! One WebSocket connection per desktop instance. Every frame is a JSON
//! object tagged by `type`; commands are additionally tagged by `kind`.
//! Frames are validated here, at ingestion, so the hub and runtime work
//! with typed records instead of loosely-shaped JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// What a desktop runtime declares about itself during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub version: String,
    /// Host OS of the desktop runtime ("macos", "linux", "windows").
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Host of the embedded engine's remote-debugging endpoint.
    pub debug_host: String,
    /// Port of the embedded engine's remote-debugging endpoint.
    pub debug_port: u16,
    #[serde(default)]
    pub features: Vec<String>,
}

fn default_platform() -> String {
    "linux".to_string()
}

/// First frame a runtime sends after connecting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub runtime_type: String,
    pub instance_id: String,
    pub client_id: String,
    pub capabilities: Capabilities,
}

impl Hello {
    /// Reject malformed hellos before registering the instance.
    pub fn validate(&self) -> Result<()> {
        if self.runtime_type != "desktop" {
            return Err(Error::Protocol(format!(
                "unsupported runtime type '{}'",
                self.runtime_type
            )));
        }
        if self.client_id.is_empty() || self.instance_id.is_empty() {
            return Err(Error::Protocol("hello missing client or instance id".into()));
        }
        if self.capabilities.debug_host.is_empty() || self.capabilities.debug_port == 0 {
            return Err(Error::Protocol("hello missing debug endpoint".into()));
        }
        Ok(())
    }
}

/// Logical view bounds inside a desktop window, in device-independent pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Typed command payloads. Tagged by `kind` inside the command frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CommandKind {
    #[serde(rename_all = "camelCase")]
    OpenPage {
        window_id: String,
        key: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        bounds: Option<Bounds>,
        #[serde(default = "default_visible")]
        visible: bool,
    },
    #[serde(rename_all = "camelCase")]
    ClosePage { window_id: String, key: String },
    #[serde(rename_all = "camelCase")]
    UiEvent { window_id: String, event: Value },
}

fn default_visible() -> bool {
    true
}

/// A command as it travels on the wire: request id plus the kind-tagged
/// payload. The payload stays raw until [`CommandFrame::kind`] so a runtime
/// can still ack a command whose kind it does not understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandFrame {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(flatten)]
    pub payload: Value,
}

impl CommandFrame {
    pub fn new(request_id: String, kind: &CommandKind) -> Result<Self> {
        Ok(Self {
            request_id,
            payload: serde_json::to_value(kind)?,
        })
    }

    pub fn kind(&self) -> Result<CommandKind> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| Error::Protocol(format!("unsupported command: {}", e)))
    }
}

/// Acknowledgement for exactly one command, correlated by request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckFrame {
    pub request_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckFrame {
    pub fn success(request_id: String, result: Value) -> Self {
        Self {
            request_id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(request_id: String, error: String) -> Self {
        Self {
            request_id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Frames sent by the desktop runtime to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Hello(Hello),
    #[serde(rename_all = "camelCase")]
    Ping { client_time: i64 },
    Ack(AckFrame),
}

/// Frames sent by the hub to a desktop runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    HelloAck {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Pong,
    Command(CommandFrame),
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("bad client frame: {}", e)))
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("bad server frame: {}", e)))
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hello() -> Hello {
        Hello {
            runtime_type: "desktop".into(),
            instance_id: "inst-1".into(),
            client_id: "c1".into(),
            capabilities: Capabilities {
                version: "0.2.1".into(),
                platform: "linux".into(),
                debug_host: "127.0.0.1".into(),
                debug_port: 9222,
                features: vec!["views".into()],
            },
        }
    }

    #[test]
    fn hello_validation_rejects_foreign_runtime() {
        let mut h = hello();
        h.runtime_type = "mobile".into();
        assert!(h.validate().is_err());
        assert!(hello().validate().is_ok());
    }

    #[test]
    fn hello_validation_rejects_missing_debug_endpoint() {
        let mut h = hello();
        h.capabilities.debug_port = 0;
        assert!(h.validate().is_err());
    }

    #[test]
    fn command_frame_decodes_known_kind() {
        let kind = CommandKind::OpenPage {
            window_id: "w1".into(),
            key: "main".into(),
            url: "https://example.com".into(),
            bounds: None,
            visible: true,
        };
        let frame = CommandFrame::new("req-1".into(), &kind).unwrap();
        let text = ServerMessage::Command(frame).encode();

        let parsed = ServerMessage::parse(&text).unwrap();
        match parsed {
            ServerMessage::Command(f) => match f.kind().unwrap() {
                CommandKind::OpenPage { key, url, .. } => {
                    assert_eq!(key, "main");
                    assert_eq!(url, "https://example.com");
                }
                other => panic!("wrong kind: {other:?}"),
            },
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_command_kind_keeps_request_id() {
        // A runtime must still be able to ack a command it cannot decode.
        let text = json!({
            "type": "command",
            "requestId": "req-9",
            "kind": "teleport",
            "destination": "mars",
        })
        .to_string();

        match ServerMessage::parse(&text).unwrap() {
            ServerMessage::Command(frame) => {
                assert_eq!(frame.request_id, "req-9");
                assert!(frame.kind().is_err());
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn malformed_frame_is_a_protocol_error() {
        assert!(ClientMessage::parse("{\"type\":\"nope\"}").is_err());
        assert!(ClientMessage::parse("not json").is_err());
    }
}
