use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::hub::HubEvent;
use crate::session::UserId;

/// Frame purpose tag, serialized as a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum OpCode {
    Hello = 0,
    ClientAuthenticate = 1,
    AuthenticationSuccess = 2,
    Heartbeat = 3,
    HeartbeatAck = 4,
    Event = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownOpCode(pub u8);

impl fmt::Display for UnknownOpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown opcode {}", self.0)
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = UnknownOpCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Hello),
            1 => Ok(Self::ClientAuthenticate),
            2 => Ok(Self::AuthenticationSuccess),
            3 => Ok(Self::Heartbeat),
            4 => Ok(Self::HeartbeatAck),
            5 => Ok(Self::Event),
            other => Err(UnknownOpCode(other)),
        }
    }
}

/// A single JSON frame on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub op: OpCode,
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(rename = "d", default)]
    pub data: Value,
    #[serde(rename = "sequenceNumber", default)]
    pub sequence_number: u64,
}

impl Frame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages a session can queue for its client, before sequencing
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Hello { heartbeat_interval_ms: u64 },
    AuthenticationSuccess { user_id: UserId },
    HeartbeatAck,
    Event(Arc<HubEvent>),
}

impl ServerMessage {
    pub fn op(&self) -> OpCode {
        match self {
            Self::Hello { .. } => OpCode::Hello,
            Self::AuthenticationSuccess { .. } => OpCode::AuthenticationSuccess,
            Self::HeartbeatAck => OpCode::HeartbeatAck,
            Self::Event(_) => OpCode::Event,
        }
    }

    /// Payload for control frames. Event payloads go through the projector instead.
    pub(crate) fn control_payload(&self) -> Value {
        match self {
            Self::Hello {
                heartbeat_interval_ms,
            } => json!({ "heartbeatInterval": heartbeat_interval_ms }),
            Self::AuthenticationSuccess { user_id } => json!({ "userId": user_id }),
            Self::HeartbeatAck | Self::Event(_) => Value::Null,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClientFrame {
    op: OpCode,
    #[serde(default)]
    d: Value,
}

#[derive(Debug, Deserialize)]
struct AuthenticatePayload {
    token: String,
}

/// Messages received from the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Authenticate { token: String },
    Heartbeat,
    /// A server-only opcode sent by the client
    Unexpected(OpCode),
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let frame: ClientFrame = serde_json::from_str(text)?;
        match frame.op {
            OpCode::ClientAuthenticate => {
                let payload = AuthenticatePayload::deserialize(&frame.d)?;
                Ok(Self::Authenticate {
                    token: payload.token,
                })
            }
            OpCode::Heartbeat => Ok(Self::Heartbeat),
            other => Ok(Self::Unexpected(other)),
        }
    }
}
