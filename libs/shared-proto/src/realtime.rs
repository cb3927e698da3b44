//! Phoenix-channel frames spoken by the realtime socket, and the payloads
//! carried inside them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const PROTOCOL_VSN: &str = "1.0.0";
pub const PHOENIX_TOPIC: &str = "phoenix";

pub mod events {
    pub const JOIN: &str = "phx_join";
    pub const LEAVE: &str = "phx_leave";
    pub const REPLY: &str = "phx_reply";
    pub const ERROR: &str = "phx_error";
    pub const CLOSE: &str = "phx_close";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
    pub const BROADCAST: &str = "broadcast";
    pub const SYSTEM: &str = "system";
    pub const ACCESS_TOKEN: &str = "access_token";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl Frame {
    pub fn heartbeat(reference: String) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: events::HEARTBEAT.to_string(),
            payload: Value::Object(Default::default()),
            reference: Some(reference),
            join_ref: None,
        }
    }

    pub fn join(topic: &str, payload: &JoinPayload, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: events::JOIN.to_string(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
            join_ref: Some(reference.clone()),
            reference: Some(reference),
        }
    }

    pub fn leave(topic: &str, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: events::LEAVE.to_string(),
            payload: Value::Object(Default::default()),
            reference: Some(reference),
            join_ref: None,
        }
    }

    /// Hands a refreshed JWT to an already joined channel.
    pub fn access_token(topic: &str, token: &str, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: events::ACCESS_TOKEN.to_string(),
            payload: serde_json::json!({ "access_token": token }),
            reference: Some(reference),
            join_ref: None,
        }
    }

    pub fn broadcast(topic: &str, event: &str, payload: Value, reference: String) -> Self {
        let body = BroadcastPayload {
            kind: events::BROADCAST.to_string(),
            event: event.to_string(),
            payload,
        };
        Self {
            topic: topic.to_string(),
            event: events::BROADCAST.to_string(),
            payload: serde_json::to_value(body).unwrap_or(Value::Null),
            reference: Some(reference),
            join_ref: None,
        }
    }
}

/// Channel topics are namespaced as `realtime:<name>` on the wire.
pub fn topic_for(name: &str) -> String {
    format!("realtime:{name}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinPayload {
    pub config: ChannelConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub broadcast: BroadcastConfig,
    pub presence: PresenceConfig,
    pub postgres_changes: Vec<PostgresChangeFilter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BroadcastConfig {
    pub ack: bool,
    #[serde(rename = "self")]
    pub echo_self: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PresenceConfig {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostgresChangeFilter {
    pub event: String,
    pub schema: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl PostgresChangeFilter {
    pub fn all_events(schema: &str, table: &str) -> Self {
        Self {
            event: "*".to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyPayload {
    pub status: String,
    #[serde(default)]
    pub response: Value,
}

impl ReplyPayload {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeType {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostgresChangePayload {
    pub data: PostgresChange,
    #[serde(default)]
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostgresChange {
    pub schema: String,
    pub table: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
    #[serde(default)]
    pub errors: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Typing,
    StopTyping,
}

impl TypingSignal {
    pub fn event_name(self) -> &'static str {
        match self {
            TypingSignal::Typing => "typing",
            TypingSignal::StopTyping => "stop_typing",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "typing" => Some(TypingSignal::Typing),
            "stop_typing" => Some(TypingSignal::StopTyping),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub user_id: Uuid,
}
