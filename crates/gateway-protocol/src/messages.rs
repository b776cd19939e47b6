//! Gateway message format
//!
//! Defines the envelope for all WebSocket messages.

use crate::opcodes::OpCode;
use crate::payloads::{HelloPayload, IdentifyPayload, ReadyPayload, ResumePayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway message envelope
///
/// All messages sent over the WebSocket connection follow this format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event type (only for op=0 Dispatch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event data payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl GatewayMessage {
    // === Outbound messages ===

    /// Create a Heartbeat message (op=1) carrying the last seen sequence
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self {
            op: OpCode::Heartbeat,
            t: None,
            s: None,
            d: last_sequence.map(|s| Value::Number(s.into())),
        }
    }

    /// Create an Identify message (op=2)
    pub fn identify(payload: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op: OpCode::Identify,
            t: None,
            s: None,
            d: Some(serde_json::to_value(payload)?),
        })
    }

    /// Create a Resume message (op=6)
    pub fn resume(payload: &ResumePayload) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op: OpCode::Resume,
            t: None,
            s: None,
            d: Some(serde_json::to_value(payload)?),
        })
    }

    // === Parsing inbound messages ===

    /// Try to parse as a Hello payload (op=10)
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.d.as_ref().and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Try to parse as a Ready dispatch payload
    pub fn as_ready(&self) -> Option<ReadyPayload> {
        if self.op != OpCode::Dispatch {
            return None;
        }
        self.d.as_ref().and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Read the invalid-session resumable flag (op=9)
    ///
    /// A missing or malformed `d` is treated as not resumable.
    #[must_use]
    pub fn as_invalid_session_resumable(&self) -> Option<bool> {
        if self.op != OpCode::InvalidSession {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_bool).unwrap_or(false))
    }

    /// Check if this is a dispatch carrying the given event name
    #[must_use]
    pub fn is_dispatch_of(&self, name: &str) -> bool {
        self.op == OpCode::Dispatch && self.t.as_deref() == Some(name)
    }

    // === Utilities ===

    /// Check if this message may legally arrive from the server
    #[must_use]
    pub fn is_valid_receive_message(&self) -> bool {
        self.op.is_receive_op()
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intents::GatewayIntents;
    use crate::payloads::IdentifyProperties;

    #[test]
    fn test_heartbeat_message() {
        let msg = GatewayMessage::heartbeat(Some(41));
        assert_eq!(msg.op, OpCode::Heartbeat);
        assert_eq!(msg.d, Some(Value::Number(41.into())));

        let msg_null = GatewayMessage::heartbeat(None);
        assert!(msg_null.d.is_none());
    }

    #[test]
    fn test_identify_message() {
        let payload = IdentifyPayload {
            token: "tok".to_string(),
            properties: IdentifyProperties::new(),
            intents: GatewayIntents::GUILDS,
            shard: Some([0, 1]),
            compress: false,
        };

        let msg = GatewayMessage::identify(&payload).unwrap();
        assert_eq!(msg.op, OpCode::Identify);
        assert!(msg.to_json().unwrap().contains("tok"));
    }

    #[test]
    fn test_resume_message() {
        let payload = ResumePayload {
            token: "tok".to_string(),
            session_id: "sess".to_string(),
            seq: 17,
        };

        let msg = GatewayMessage::resume(&payload).unwrap();
        assert_eq!(msg.op, OpCode::Resume);

        let json = msg.to_json().unwrap();
        assert!(json.contains("sess"));
        assert!(json.contains("17"));
    }

    #[test]
    fn test_parse_hello() {
        let msg = GatewayMessage::from_json(r#"{"op":10,"d":{"heartbeat_interval":45000}}"#).unwrap();
        let hello = msg.as_hello().unwrap();
        assert_eq!(hello.heartbeat_interval, 45_000);

        // Wrong op yields nothing
        let other = GatewayMessage::heartbeat(None);
        assert!(other.as_hello().is_none());
    }

    #[test]
    fn test_parse_invalid_session() {
        let resumable = GatewayMessage::from_json(r#"{"op":9,"d":true}"#).unwrap();
        assert_eq!(resumable.as_invalid_session_resumable(), Some(true));

        let not_resumable = GatewayMessage::from_json(r#"{"op":9,"d":false}"#).unwrap();
        assert_eq!(not_resumable.as_invalid_session_resumable(), Some(false));

        // Missing d defaults to not resumable
        let missing = GatewayMessage::from_json(r#"{"op":9}"#).unwrap();
        assert_eq!(missing.as_invalid_session_resumable(), Some(false));
    }

    #[test]
    fn test_is_dispatch_of() {
        let msg =
            GatewayMessage::from_json(r#"{"op":0,"t":"READY","s":1,"d":{}}"#).unwrap();
        assert!(msg.is_dispatch_of("READY"));
        assert!(!msg.is_dispatch_of("RESUMED"));
    }

    #[test]
    fn test_message_roundtrip() {
        let json = r#"{"op":0,"t":"MESSAGE_CREATE","s":5,"d":{"id":"1"}}"#;
        let msg = GatewayMessage::from_json(json).unwrap();
        let parsed = GatewayMessage::from_json(&msg.to_json().unwrap()).unwrap();

        assert_eq!(parsed.op, msg.op);
        assert_eq!(parsed.t, msg.t);
        assert_eq!(parsed.s, msg.s);
    }

    #[test]
    fn test_message_display() {
        let msg =
            GatewayMessage::from_json(r#"{"op":0,"t":"MESSAGE_CREATE","s":5,"d":{}}"#).unwrap();
        let display = format!("{}", msg);
        assert!(display.contains("MESSAGE_CREATE"));
        assert!(display.contains("s=5"));

        let hb = GatewayMessage::heartbeat(None);
        assert!(format!("{}", hb).contains("Heartbeat"));
    }
}
