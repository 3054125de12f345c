use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::SenderType;

/// Error codes a client can receive on the realtime gateway (section 4.9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    NotSubscribed,
    InternalError,
}

/// Client → server verbs.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Publish {
        channel: String,
        event: String,
        payload: Value,
    },
}

/// Server-controlled metadata attached to every broadcast — callers can
/// never spoof this envelope themselves (section 4.9).
#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeMeta {
    pub channel: String,
    #[serde(rename = "messageId")]
    pub message_id: Uuid,
    #[serde(rename = "senderType")]
    pub sender_type: SenderType,
    #[serde(rename = "senderId", skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    pub event: String,
    pub payload: Value,
    pub meta: EnvelopeMeta,
}

/// Server → client reply to a `subscribe` request.
#[derive(Debug, Serialize)]
pub struct SubscribeAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
}

#[derive(Debug, Serialize)]
pub struct ErrorFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub error: ErrorCode,
    pub message: String,
}

impl ErrorFrame {
    pub fn new(error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            frame_type: "error",
            error,
            message: message.into(),
        }
    }
}
